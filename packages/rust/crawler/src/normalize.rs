//! Raw message → [`ParsedMessage`] normalization.

use threadcrawl_shared::{ParsedMessage, RawMessage, Result, ThreadCrawlError};

use crate::extract::extract_attachments;

/// Build the canonical form of a message.
///
/// Fails with `MalformedMessage` when text, timestamp, or author is absent.
/// Mentions are left in the text untouched.
pub fn normalize(raw: &RawMessage) -> Result<ParsedMessage> {
    let (Some(text), Some(ts), Some(_user)) = (&raw.text, &raw.ts, &raw.user) else {
        return Err(ThreadCrawlError::malformed(format!(
            "text, ts, or user is missing (ts={})",
            raw.ts.as_deref().unwrap_or("?")
        )));
    };

    Ok(ParsedMessage {
        id: message_id(raw.thread_ts.as_deref(), ts),
        text: text.clone(),
        attachments: extract_attachments(raw),
    })
}

/// Stable per-channel id: `thread_ts/ts` inside a thread, `ts` otherwise.
pub fn message_id(thread_ts: Option<&str>, ts: &str) -> String {
    match thread_ts {
        Some(root) => format!("{root}/{ts}"),
        None => ts.to_string(),
    }
}
