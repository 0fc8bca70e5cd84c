//! Canonical single-message resolution.
//!
//! Bulk reply listings can hand back stubs (transient edits, partially
//! hydrated records). The resolver re-fetches exactly one revision of a
//! message and normalizes it.

use tracing::{debug, instrument};

use threadcrawl_shared::{ParsedMessage, Result, ThreadCrawlError};

use crate::normalize::normalize;
use crate::transport::ChatTransport;

/// Re-fetch the message at `message_ts` (the thread root itself when
/// `None`) and normalize it.
///
/// Returns `Ok(None)` when the transport has no message entry at that
/// position. Missing metadata or a missing messages array is a protocol
/// violation; a malformed canonical copy propagates as `MalformedMessage`.
#[instrument(skip(transport))]
pub async fn resolve_canonical(
    transport: &dyn ChatTransport,
    channel: &str,
    thread_root: &str,
    message_ts: Option<&str>,
) -> Result<Option<ParsedMessage>> {
    let message_ts = message_ts.unwrap_or(thread_root);
    let page = transport.resolve_single_message(channel, message_ts).await?;

    if page.response_metadata.is_none() {
        return Err(ThreadCrawlError::protocol(format!(
            "response_metadata missing resolving {message_ts} in {channel}"
        )));
    }
    let Some(messages) = page.messages else {
        return Err(ThreadCrawlError::protocol(format!(
            "messages missing resolving {message_ts} in {channel}"
        )));
    };

    match messages.iter().find(|m| m.is_message()) {
        Some(raw) => normalize(raw).map(Some),
        None => {
            debug!(message_ts, "no message at resolved position, skipping");
            Ok(None)
        }
    }
}
