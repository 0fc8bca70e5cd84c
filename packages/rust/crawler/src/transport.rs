//! The chat-history transport contract.
//!
//! Every listing call returns a [`HistoryPage`]. Callers decide which missing
//! fields are fatal; the transport only reports what the API sent back.

use async_trait::async_trait;

use threadcrawl_shared::{HistoryPage, Result};

/// Paginated access to a channel's messages and threads.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// One page of top-level channel history, starting at `cursor`.
    async fn list_channel_history(
        &self,
        channel: &str,
        cursor: Option<&str>,
    ) -> Result<HistoryPage>;

    /// One page of the thread rooted at `thread_ts`, starting at `cursor`.
    async fn list_thread_replies(
        &self,
        channel: &str,
        thread_ts: &str,
        cursor: Option<&str>,
    ) -> Result<HistoryPage>;

    /// Re-fetch exactly the message at `ts`: limit 1, latest bound `ts`.
    async fn resolve_single_message(&self, channel: &str, ts: &str) -> Result<HistoryPage>;
}
