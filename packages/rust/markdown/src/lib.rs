//! Webpage fetching and HTML-to-text conversion.
//!
//! Pages are fetched with `reqwest`, the main content container is picked
//! out with `scraper`, converted with `htmd`, and then flattened to plain
//! prose by the passes in [`cleanup`].

mod cleanup;

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use threadcrawl_shared::{Result, ThreadCrawlError, WebpageText};

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("threadcrawl/", env!("CARGO_PKG_VERSION"));

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of converting an HTML document to plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// `<title>` contents, or the first H1 when the head has none.
    pub title: Option<String>,
    /// Cleaned body text.
    pub text: String,
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Fetches a webpage and returns its readable text.
pub struct WebpageExtractor {
    client: Client,
}

impl WebpageExtractor {
    /// Create an extractor with the default timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create an extractor with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| ThreadCrawlError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Fetch `url` and return at most `max_chars` characters of its text.
    ///
    /// The title falls back to the URL itself when the page has neither a
    /// `<title>` nor an H1.
    #[instrument(skip(self))]
    pub async fn extract(&self, url: &str, max_chars: usize) -> Result<WebpageText> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ThreadCrawlError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ThreadCrawlError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ThreadCrawlError::Network(format!("{url}: body read failed: {e}")))?;

        let page = html_to_text(&body, url)?;
        let text = truncate_chars(&page.text, max_chars);

        debug!(
            body_len = body.len(),
            text_chars = text.chars().count(),
            "page extracted"
        );

        Ok(WebpageText {
            text,
            title: page.title.unwrap_or_else(|| url.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Convert an HTML document to plain text.
///
/// Chrome (`nav`, `header`, `footer`, `aside`, scripts) is dropped, links
/// collapse to their labels and images disappear.
pub fn html_to_text(html: &str, source_url: &str) -> Result<PageText> {
    let doc = Html::parse_document(html);
    let head_title = document_title(&doc);

    let content_html = extract_content_html(&doc, html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript", "svg",
            "form",
        ])
        .build();

    let raw = converter
        .convert(&content_html)
        .map_err(|e| ThreadCrawlError::Conversion(format!("htmd conversion failed: {e}")))?;

    let base_url = Url::parse(source_url).ok();
    let h1 = first_heading(&raw);
    let text = cleanup::run_pipeline(&raw, base_url.as_ref());

    Ok(PageText {
        title: head_title.or(h1),
        text,
    })
}

/// Keep at most `max_chars` characters, never splitting a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Pick the main content container, falling back to `<body>`.
fn extract_content_html(doc: &Html, raw: &str) -> String {
    let selectors = [
        "article .markdown",
        "[role=\"main\"]",
        "article",
        "main",
        ".content",
        "#content",
        "body",
    ];

    for sel_str in &selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    raw.to_string()
}

fn document_title(doc: &Html) -> Option<String> {
    let selector = Selector::parse("head > title").ok()?;
    doc.select(&selector)
        .next()
        .map(|el| collapse_spaces(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// First Markdown H1 in the converted output.
fn first_heading(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE
        .captures(md)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
