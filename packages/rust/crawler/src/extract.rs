//! Attachment and URL extraction from raw message fields.
//!
//! Everything here is pure and total: malformed or missing fields simply
//! contribute nothing.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use threadcrawl_shared::{Attachment, RawMessage};

/// Collect the message's linked resources in source-precedence order.
///
/// Unfurls with a resolved `original_url` come first, then app unfurls,
/// interleaved in attachment order; uploaded files are appended after all
/// attachments.
pub fn extract_attachments(raw: &RawMessage) -> Vec<Attachment> {
    let mut out = Vec::new();

    for att in raw.attachments.iter().flatten() {
        let title = att.title.clone().unwrap_or_default();
        if let Some(url) = &att.original_url {
            out.push(Attachment {
                title,
                url: url.clone(),
            });
        } else if att.is_app_unfurl == Some(true) {
            if let Some(url) = &att.app_unfurl_url {
                out.push(Attachment {
                    title,
                    url: url.clone(),
                });
            }
        }
    }

    for file in raw.files.iter().flatten() {
        if let Some(url) = &file.url_private {
            out.push(Attachment {
                title: file.title.clone().unwrap_or_default(),
                url: url.clone(),
            });
        }
    }

    out
}

/// Find links in message text, deduplicated in order of first appearance.
///
/// Understands Slack link markup (`<https://x>` and `<https://x|label>`) as
/// well as bare URLs. Slack's `&amp;`, `&lt;` and `&gt;` escapes are decoded.
pub fn extract_urls(text: &str) -> Vec<String> {
    static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<(https?://[^|>\s]+)(?:\|[^>]*)?>|(https?://[^\s<>|]+)").expect("valid regex")
    });

    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for caps in URL_RE.captures_iter(text) {
        let url = match (caps.get(1), caps.get(2)) {
            (Some(marked), _) => marked.as_str(),
            (None, Some(bare)) => trim_trailing_punctuation(bare.as_str()),
            (None, None) => continue,
        };
        let url = unescape(url);
        if seen.insert(url.clone()) {
            urls.push(url);
        }
    }

    urls
}

/// URLs in `text` that are not already covered by an attachment.
pub fn embedded_urls(text: &str, attachments: &[Attachment]) -> Vec<String> {
    extract_urls(text)
        .into_iter()
        .filter(|url| !attachments.iter().any(|a| &a.url == url))
        .collect()
}

/// User ids mentioned as `<@U…>`, in order of appearance.
pub fn mentioned_user_ids(text: &str) -> Vec<String> {
    static MENTION_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<@(U[A-Z0-9]+)>").expect("valid regex"));

    MENTION_RE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Undo Slack's text escaping. `&amp;` goes last so `&amp;lt;` stays `&lt;`.
fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn trim_trailing_punctuation(url: &str) -> &str {
    url.trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '\'', '"'])
}
