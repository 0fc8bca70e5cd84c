//! Best-effort content enrichment for message attachments and links.
//!
//! Every source is enriched independently: a failure is logged and the
//! fragment is omitted, never propagated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use threadcrawl_markdown::WebpageExtractor;
use threadcrawl_shared::{
    Attachment, DEFAULT_MAX_CHARS, EnrichedFragment, Result, ThreadCrawlError, WebpageText,
};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Authenticated download of raw bytes.
#[async_trait]
pub trait BytesFetcher: Send + Sync {
    async fn fetch_bytes(&self, url: &str, credential: &str) -> Result<Vec<u8>>;
}

/// Turns image bytes into lines of descriptive text.
#[async_trait]
pub trait ImageCaptioner: Send + Sync {
    async fn caption(&self, image: Vec<u8>) -> Result<Vec<String>>;
}

/// Fetches a web page and returns up to `max_chars` characters of its text.
#[async_trait]
pub trait PageTextExtractor: Send + Sync {
    async fn extract(&self, url: &str, max_chars: usize) -> Result<WebpageText>;
}

#[async_trait]
impl PageTextExtractor for WebpageExtractor {
    async fn extract(&self, url: &str, max_chars: usize) -> Result<WebpageText> {
        WebpageExtractor::extract(self, url, max_chars).await
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// One enrichable item of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentSource {
    /// A normalized attachment; keeps its own title.
    Attachment(Attachment),
    /// A link found in the message text; titled by the page itself.
    EmbeddedUrl(String),
}

impl EnrichmentSource {
    pub fn url(&self) -> &str {
        match self {
            Self::Attachment(a) => &a.url,
            Self::EmbeddedUrl(url) => url,
        }
    }
}

/// Whether `url` points at an image the captioner should handle.
///
/// Only lowercase `.jpg`, `.jpeg` and `.png` path suffixes qualify. Strings
/// that do not parse as URLs are checked as-is.
pub fn is_image_url(url: &str) -> bool {
    const SUFFIXES: [&str; 3] = [".jpg", ".jpeg", ".png"];

    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    };
    SUFFIXES.iter().any(|s| path.ends_with(s))
}

// ---------------------------------------------------------------------------
// Enricher
// ---------------------------------------------------------------------------

/// Produces [`EnrichedFragment`]s from attachments and embedded URLs.
pub struct ContentEnricher {
    fetcher: Arc<dyn BytesFetcher>,
    captioner: Arc<dyn ImageCaptioner>,
    extractor: Arc<dyn PageTextExtractor>,
    max_chars: usize,
}

impl ContentEnricher {
    pub fn new(
        fetcher: Arc<dyn BytesFetcher>,
        captioner: Arc<dyn ImageCaptioner>,
        extractor: Arc<dyn PageTextExtractor>,
    ) -> Self {
        Self {
            fetcher,
            captioner,
            extractor,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    /// Character budget handed to the page extractor.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    /// Enrich one source of message `id`.
    ///
    /// Returns `None` when enrichment fails for any reason.
    #[instrument(skip(self, credential), fields(url = %source.url()))]
    pub async fn enrich(
        &self,
        id: &str,
        source: &EnrichmentSource,
        credential: &str,
    ) -> Option<EnrichedFragment> {
        match self.try_enrich(id, source, credential).await {
            Ok(fragment) => {
                debug!(chars = fragment.text.chars().count(), "source enriched");
                Some(fragment)
            }
            Err(e) => {
                warn!(error = %e, "enrichment failed, skipping source");
                None
            }
        }
    }

    async fn try_enrich(
        &self,
        id: &str,
        source: &EnrichmentSource,
        credential: &str,
    ) -> Result<EnrichedFragment> {
        let (text, attachment) = match source {
            EnrichmentSource::Attachment(att) if is_image_url(&att.url) => {
                let bytes = self.fetcher.fetch_bytes(&att.url, credential).await?;
                let lines = self.captioner.caption(bytes).await?;
                (lines.join("\n"), att.clone())
            }
            EnrichmentSource::Attachment(att) => {
                let page = self.extractor.extract(&att.url, self.max_chars).await?;
                (page.text, att.clone())
            }
            EnrichmentSource::EmbeddedUrl(url) => {
                let page = self.extractor.extract(url, self.max_chars).await?;
                let attachment = Attachment {
                    title: page.title,
                    url: url.clone(),
                };
                (page.text, attachment)
            }
        };

        Ok(EnrichedFragment {
            id: id.to_string(),
            text,
            attachments: vec![attachment],
        })
    }
}

// ---------------------------------------------------------------------------
// HTTP byte fetcher
// ---------------------------------------------------------------------------

/// Downloads files with a bearer credential.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("threadcrawl/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ThreadCrawlError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BytesFetcher for HttpFetcher {
    async fn fetch_bytes(&self, url: &str, credential: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|e| ThreadCrawlError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ThreadCrawlError::Network(format!("{url}: HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ThreadCrawlError::Network(format!("{url}: body read failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records calls; fails for URLs containing "broken".
    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        pub calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl BytesFetcher for FakeFetcher {
        async fn fetch_bytes(&self, url: &str, credential: &str) -> Result<Vec<u8>> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), credential.to_string()));
            if url.contains("broken") {
                return Err(ThreadCrawlError::Network(format!("{url}: HTTP 404")));
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    /// Fails for images whose bytes contain "nocaption".
    pub(crate) struct FakeCaptioner;

    #[async_trait]
    impl ImageCaptioner for FakeCaptioner {
        async fn caption(&self, image: Vec<u8>) -> Result<Vec<String>> {
            if String::from_utf8_lossy(&image).contains("nocaption") {
                return Err(ThreadCrawlError::Enrichment("model rejected image".into()));
            }
            Ok(vec!["a cat".into(), "on a mat".into()])
        }
    }

    /// Echoes the URL; fails for URLs containing "broken".
    #[derive(Default)]
    pub(crate) struct FakeExtractor {
        pub calls: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl PageTextExtractor for FakeExtractor {
        async fn extract(&self, url: &str, max_chars: usize) -> Result<WebpageText> {
            self.calls.lock().unwrap().push((url.to_string(), max_chars));
            if url.contains("broken") {
                return Err(ThreadCrawlError::Network(format!("{url}: HTTP 500")));
            }
            Ok(WebpageText {
                text: format!("text of {url}"),
                title: format!("page {url}"),
            })
        }
    }

    pub(crate) fn fake_enricher() -> (ContentEnricher, Arc<FakeFetcher>, Arc<FakeExtractor>) {
        let fetcher = Arc::new(FakeFetcher::default());
        let extractor = Arc::new(FakeExtractor::default());
        let enricher = ContentEnricher::new(
            fetcher.clone(),
            Arc::new(FakeCaptioner),
            extractor.clone(),
        );
        (enricher, fetcher, extractor)
    }

    fn attachment(title: &str, url: &str) -> EnrichmentSource {
        EnrichmentSource::Attachment(Attachment {
            title: title.into(),
            url: url.into(),
        })
    }

    #[test]
    fn image_suffixes() {
        assert!(is_image_url("https://files.example.com/T1/shot.png"));
        assert!(is_image_url("https://files.example.com/T1/photo.jpeg"));
        assert!(is_image_url("https://files.example.com/T1/photo.jpg?t=xoxe"));
        assert!(!is_image_url("https://files.example.com/T1/photo.JPG"));
        assert!(!is_image_url("https://files.example.com/T1/notes.pdf"));
        assert!(!is_image_url("https://example.com/png"));
        assert!(is_image_url("not a url.png"));
    }

    #[tokio::test]
    async fn image_attachment_is_captioned_with_credential() {
        let (enricher, fetcher, extractor) = fake_enricher();
        let source = attachment("shot.png", "https://files.example.com/shot.png");

        let fragment = enricher.enrich("100.1", &source, "xoxb-1").await.unwrap();

        assert_eq!(fragment.id, "100.1");
        assert_eq!(fragment.text, "a cat\non a mat");
        assert_eq!(fragment.attachments[0].title, "shot.png");
        assert_eq!(fragment.attachments[0].url, "https://files.example.com/shot.png");
        assert_eq!(
            *fetcher.calls.lock().unwrap(),
            vec![("https://files.example.com/shot.png".to_string(), "xoxb-1".to_string())]
        );
        assert!(extractor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn uppercase_extension_goes_to_page_extractor() {
        let (enricher, fetcher, extractor) = fake_enricher();
        let source = attachment("SHOT", "https://files.example.com/SHOT.JPG");

        let fragment = enricher.enrich("1", &source, "t").await.unwrap();

        assert!(fetcher.calls.lock().unwrap().is_empty());
        assert_eq!(extractor.calls.lock().unwrap().len(), 1);
        assert_eq!(fragment.attachments[0].title, "SHOT");
    }

    #[tokio::test]
    async fn attachment_keeps_its_title() {
        let (enricher, _, extractor) = fake_enricher();
        let source = attachment("Design doc", "https://docs.example.com/d");

        let fragment = enricher.enrich("1", &source, "t").await.unwrap();

        assert_eq!(fragment.text, "text of https://docs.example.com/d");
        assert_eq!(fragment.attachments[0].title, "Design doc");
        assert_eq!(
            extractor.calls.lock().unwrap()[0],
            ("https://docs.example.com/d".to_string(), DEFAULT_MAX_CHARS)
        );
    }

    #[tokio::test]
    async fn embedded_url_takes_page_title() {
        let (enricher, _, _) = fake_enricher();
        let source = EnrichmentSource::EmbeddedUrl("https://example.org/x".into());

        let fragment = enricher.enrich("1", &source, "t").await.unwrap();

        assert_eq!(
            fragment.attachments,
            vec![Attachment {
                title: "page https://example.org/x".into(),
                url: "https://example.org/x".into(),
            }]
        );
    }

    #[tokio::test]
    async fn embedded_image_url_is_not_captioned() {
        let (enricher, fetcher, _) = fake_enricher();
        let source = EnrichmentSource::EmbeddedUrl("https://example.org/pic.png".into());
        enricher.enrich("1", &source, "t").await.unwrap();
        assert!(fetcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failures_yield_none() {
        let (enricher, _, _) = fake_enricher();
        for source in [
            attachment("img", "https://files.example.com/broken.png"),
            attachment("doc", "https://broken.example.com/doc"),
            EnrichmentSource::EmbeddedUrl("https://broken.example.com".into()),
        ] {
            assert!(enricher.enrich("1", &source, "t").await.is_none());
        }
    }

    #[tokio::test]
    async fn caption_failure_yields_none_after_fetch() {
        let (enricher, fetcher, extractor) = fake_enricher();
        let source = attachment("shot.png", "https://files.example.com/nocaption.png");

        assert!(enricher.enrich("1", &source, "t").await.is_none());
        assert_eq!(fetcher.calls.lock().unwrap().len(), 1);
        assert!(extractor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn custom_budget_is_passed_through() {
        let (enricher, _, extractor) = fake_enricher();
        let enricher = enricher.with_max_chars(250);
        let source = EnrichmentSource::EmbeddedUrl("https://example.org".into());
        enricher.enrich("1", &source, "t").await.unwrap();
        assert_eq!(extractor.calls.lock().unwrap()[0].1, 250);
    }

    #[tokio::test]
    async fn http_fetcher_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/shot.png"))
            .and(header("authorization", "Bearer xoxb-9"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let bytes = fetcher
            .fetch_bytes(&format!("{}/files/shot.png", server.uri()), "xoxb-9")
            .await
            .unwrap();
        assert_eq!(bytes, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn http_fetcher_rejects_errors() {
        let server = MockServer::start().await;
        Mock::given(path("/files/missing.png"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let err = fetcher
            .fetch_bytes(&format!("{}/files/missing.png", server.uri()), "t")
            .await
            .unwrap_err();
        assert!(matches!(err, ThreadCrawlError::Network(_)));
    }
}
