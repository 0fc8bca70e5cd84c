//! Core domain types for threadcrawl.
//!
//! Raw transport records are deserialized straight from the chat API's JSON,
//! so every field on them is optional. The normalized types below them are
//! what the rest of the pipeline works with.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Raw transport records
// ---------------------------------------------------------------------------

/// A message record as returned by the chat transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Record kind; plain messages carry `"message"`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Set for edits, joins, bot posts and other system-generated entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Message timestamp, unique within a channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    /// Author id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Timestamp of the thread root, if the message belongs to a thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<RawFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<RawAttachment>>,
}

impl RawMessage {
    /// Whether the record is a message at all (as opposed to another event kind).
    pub fn is_message(&self) -> bool {
        self.kind.as_deref() == Some("message")
    }

    /// A plain, unedited, user-authored message.
    pub fn is_plain_message(&self) -> bool {
        self.is_message() && self.subtype.is_none()
    }

    /// Whether text, timestamp, and author are all present.
    pub fn is_complete(&self) -> bool {
        self.text.is_some() && self.ts.is_some() && self.user.is_some()
    }
}

/// A link unfurl or app attachment on a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAttachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// The resolved URL the unfurl was produced from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_app_unfurl: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_unfurl_url: Option<String>,
}

/// A file uploaded to the channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Download URL that requires the channel's bearer credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_private: Option<String>,
}

/// Pagination metadata attached to every listing page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CursorMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl CursorMetadata {
    /// The cursor for the next page, treating an empty string as "none".
    pub fn cursor(&self) -> Option<String> {
        self.next_cursor.clone().filter(|c| !c.is_empty())
    }
}

/// One page of a paginated channel, thread, or single-message listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<RawMessage>>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_metadata: Option<CursorMetadata>,
}

// ---------------------------------------------------------------------------
// Normalized records
// ---------------------------------------------------------------------------

/// A titled link to a resource attached to or referenced by a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attachment {
    pub title: String,
    pub url: String,
}

/// The canonical form of a message, ready for enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
    /// `thread_ts/ts` for thread members, `ts` otherwise.
    pub id: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

/// Content derived from one attachment or URL of a message.
///
/// Shares the parent message's `id`. A parsed message is itself the base
/// fragment of its own document set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedFragment {
    pub id: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl From<ParsedMessage> for EnrichedFragment {
    fn from(msg: ParsedMessage) -> Self {
        Self {
            id: msg.id,
            text: msg.text,
            attachments: msg.attachments,
        }
    }
}

/// A single document handed to the search index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexableDocument {
    pub url: String,
    pub name: String,
    pub text: String,
}

/// Text and title pulled from a web page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebpageText {
    pub text: String,
    pub title: String,
}
