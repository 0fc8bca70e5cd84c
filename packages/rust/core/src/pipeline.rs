//! Channel crawl: channel history → thread replies → canonical message → index.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, instrument};

use threadcrawl_crawler::{ChatTransport, embedded_urls, resolve_canonical};
use threadcrawl_shared::{HistoryPage, IndexableDocument, ParsedMessage, Result, ThreadCrawlError};
use threadcrawl_storage::Storage;

use crate::assembler::assemble_documents;
use crate::enrichment::{ContentEnricher, EnrichmentSource};

// ---------------------------------------------------------------------------
// Index seam
// ---------------------------------------------------------------------------

/// Destination for assembled documents.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    async fn index(&self, documents: &[IndexableDocument]) -> Result<()>;
}

#[async_trait]
impl DocumentIndex for Storage {
    async fn index(&self, documents: &[IndexableDocument]) -> Result<()> {
        Storage::index(self, documents).await
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Where the driver currently is in the nested traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    ListingChannel,
    ListingThread,
    ResolvingMessage,
    Done,
}

impl CrawlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListingChannel => "listing channel",
            Self::ListingThread => "listing thread",
            Self::ResolvingMessage => "resolving message",
            Self::Done => "done",
        }
    }
}

/// Progress callback for reporting crawl status.
pub trait CrawlProgress: Send + Sync {
    /// Called on every state transition.
    fn state(&self, state: CrawlState);
    /// Called after a message's documents have been indexed.
    fn message_indexed(&self, message_id: &str, documents: usize);
    /// Called once the crawl completes.
    fn done(&self, summary: &CrawlSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl CrawlProgress for SilentProgress {
    fn state(&self, _state: CrawlState) {}
    fn message_indexed(&self, _message_id: &str, _documents: usize) {}
    fn done(&self, _summary: &CrawlSummary) {}
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Counters for a finished crawl.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlSummary {
    pub channel: String,
    pub channel_pages: usize,
    pub threads_listed: usize,
    /// Replies dropped from listings because text, ts or user was missing.
    pub replies_skipped: usize,
    pub messages_indexed: usize,
    /// Messages whose canonical re-fetch came back empty.
    pub messages_skipped: usize,
    /// Fragments produced, base fragments included.
    pub fragments: usize,
    pub enrichment_failures: usize,
    pub documents_indexed: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(
    d: &Duration,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Crawls one channel at a time, indexing every resolvable message.
///
/// Traversal, enrichment and indexing run strictly in sequence; documents
/// reach the index in discovery order.
pub struct Crawler {
    transport: Arc<dyn ChatTransport>,
    enricher: ContentEnricher,
    index: Arc<dyn DocumentIndex>,
    credential: String,
    progress: Arc<dyn CrawlProgress>,
}

impl Crawler {
    /// `credential` authenticates downloads of private files (images).
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        enricher: ContentEnricher,
        index: Arc<dyn DocumentIndex>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            enricher,
            index,
            credential: credential.into(),
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn CrawlProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Crawl the full history of `channel`.
    ///
    /// Protocol violations, malformed canonical messages, transport errors and
    /// index errors abort the crawl. Enrichment failures never do.
    #[instrument(skip_all, fields(channel = %channel))]
    pub async fn crawl_channel(&self, channel: &str) -> Result<CrawlSummary> {
        let start = Instant::now();
        let mut summary = CrawlSummary {
            channel: channel.to_string(),
            ..Default::default()
        };

        info!("starting channel crawl");

        let mut cursor: Option<String> = None;
        loop {
            self.progress.state(CrawlState::ListingChannel);
            let page = self
                .transport
                .list_channel_history(channel, cursor.as_deref())
                .await?;
            summary.channel_pages += 1;

            let HistoryPage {
                messages,
                has_more,
                response_metadata,
            } = page;
            let Some(meta) = response_metadata else {
                return Err(ThreadCrawlError::protocol(format!(
                    "response_metadata missing on channel page {}",
                    summary.channel_pages
                )));
            };

            match messages {
                Some(messages) => {
                    debug!(count = messages.len(), page = summary.channel_pages, "channel page");
                    for seed in messages.iter().filter(|m| m.is_plain_message()) {
                        let Some(ts) = seed.ts.as_deref() else {
                            continue;
                        };
                        self.crawl_thread(channel, ts, &mut summary).await?;
                    }
                }
                None => debug!(page = summary.channel_pages, "channel page has no messages"),
            }

            if !has_more {
                break;
            }
            cursor = Some(next_cursor(meta.cursor(), "channel history")?);
        }

        summary.elapsed = start.elapsed();
        self.progress.state(CrawlState::Done);
        self.progress.done(&summary);

        info!(
            channel_pages = summary.channel_pages,
            threads = summary.threads_listed,
            messages_indexed = summary.messages_indexed,
            messages_skipped = summary.messages_skipped,
            replies_skipped = summary.replies_skipped,
            fragments = summary.fragments,
            enrichment_failures = summary.enrichment_failures,
            documents = summary.documents_indexed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "channel crawl complete"
        );

        Ok(summary)
    }

    /// Walk every reply page of the thread rooted at `seed_ts`.
    async fn crawl_thread(
        &self,
        channel: &str,
        seed_ts: &str,
        summary: &mut CrawlSummary,
    ) -> Result<()> {
        summary.threads_listed += 1;
        let mut cursor: Option<String> = None;

        loop {
            self.progress.state(CrawlState::ListingThread);
            let page = self
                .transport
                .list_thread_replies(channel, seed_ts, cursor.as_deref())
                .await?;

            let HistoryPage {
                messages,
                has_more,
                response_metadata,
            } = page;
            let Some(meta) = response_metadata else {
                return Err(ThreadCrawlError::protocol(format!(
                    "response_metadata missing listing thread {seed_ts}"
                )));
            };
            let Some(messages) = messages else {
                return Err(ThreadCrawlError::protocol(format!(
                    "messages missing listing thread {seed_ts}"
                )));
            };

            for reply in messages.iter().filter(|m| m.is_message()) {
                let (true, Some(ts)) = (reply.is_complete(), reply.ts.as_deref()) else {
                    debug!(thread = seed_ts, "reply lacks text, ts or user; skipping");
                    summary.replies_skipped += 1;
                    continue;
                };
                let thread_root = reply.thread_ts.as_deref().unwrap_or(ts);
                self.index_message(channel, thread_root, ts, summary).await?;
            }

            if !has_more {
                return Ok(());
            }
            cursor = Some(next_cursor(meta.cursor(), "thread replies")?);
        }
    }

    /// Resolve one message canonically, then enrich, flatten and index it.
    async fn index_message(
        &self,
        channel: &str,
        thread_root: &str,
        ts: &str,
        summary: &mut CrawlSummary,
    ) -> Result<()> {
        self.progress.state(CrawlState::ResolvingMessage);
        let Some(parsed) =
            resolve_canonical(self.transport.as_ref(), channel, thread_root, Some(ts)).await?
        else {
            summary.messages_skipped += 1;
            return Ok(());
        };

        let id = parsed.id.clone();
        let documents = self.process_message(parsed, summary).await;

        self.index.index(&documents).await?;

        summary.messages_indexed += 1;
        summary.documents_indexed += documents.len();
        self.progress.message_indexed(&id, documents.len());
        debug!(message = %id, documents = documents.len(), "message indexed");
        Ok(())
    }

    /// Enrich every attachment, then every embedded URL, and flatten the result.
    async fn process_message(
        &self,
        parsed: ParsedMessage,
        summary: &mut CrawlSummary,
    ) -> Vec<IndexableDocument> {
        let sources: Vec<EnrichmentSource> = parsed
            .attachments
            .iter()
            .cloned()
            .map(EnrichmentSource::Attachment)
            .chain(
                embedded_urls(&parsed.text, &parsed.attachments)
                    .into_iter()
                    .map(EnrichmentSource::EmbeddedUrl),
            )
            .collect();

        let mut fragments = Vec::with_capacity(sources.len());
        for source in &sources {
            match self.enricher.enrich(&parsed.id, source, &self.credential).await {
                Some(fragment) => fragments.push(fragment),
                None => summary.enrichment_failures += 1,
            }
        }

        summary.fragments += 1 + fragments.len();
        assemble_documents(parsed, fragments)
    }
}

/// A page that claims more results must say where they are.
fn next_cursor(cursor: Option<String>, listing: &str) -> Result<String> {
    cursor.ok_or_else(|| {
        ThreadCrawlError::protocol(format!("{listing}: has_more is set but next_cursor is empty"))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
