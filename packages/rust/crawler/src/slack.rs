//! Slack Web API implementation of [`ChatTransport`].
//!
//! Uses `conversations.history` for channel pages and `conversations.replies`
//! for both thread pages and single-message resolution.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use threadcrawl_shared::{HistoryPage, Result, ThreadCrawlError};

use crate::transport::ChatTransport;

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("threadcrawl/", env!("CARGO_PKG_VERSION"));

/// Default Web API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://slack.com/api";

/// Envelope shared by every Web API response.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    page: HistoryPage,
}

/// Bearer-token client for the Slack Web API.
pub struct SlackClient {
    client: Client,
    token: String,
    base_url: String,
}

impl SlackClient {
    /// Create a client for the public Slack API.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ThreadCrawlError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            token: token.into(),
            base_url: DEFAULT_API_BASE_URL.to_string(),
        })
    }

    /// Point the client at another API root (enterprise gateways, mock servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The bearer credential this client authenticates with.
    pub fn token(&self) -> &str {
        &self.token
    }

    async fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<HistoryPage> {
        let url = format!("{}/{method}", self.base_url);
        debug!(%url, ?params, "calling Slack API");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await
            .map_err(|e| ThreadCrawlError::Network(format!("{method}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ThreadCrawlError::Network(format!(
                "{method}: HTTP {status}"
            )));
        }

        let body: ApiResponse = response.json().await.map_err(|e| {
            ThreadCrawlError::Network(format!("{method}: failed to decode response: {e}"))
        })?;

        if !body.ok {
            return Err(ThreadCrawlError::Network(format!(
                "{method} failed: {}",
                body.error.unwrap_or_else(|| "unknown".to_string())
            )));
        }

        Ok(body.page)
    }
}

#[async_trait]
impl ChatTransport for SlackClient {
    #[instrument(skip(self))]
    async fn list_channel_history(
        &self,
        channel: &str,
        cursor: Option<&str>,
    ) -> Result<HistoryPage> {
        let mut params = vec![("channel", channel)];
        if let Some(c) = cursor {
            params.push(("cursor", c));
        }
        self.call("conversations.history", &params).await
    }

    #[instrument(skip(self))]
    async fn list_thread_replies(
        &self,
        channel: &str,
        thread_ts: &str,
        cursor: Option<&str>,
    ) -> Result<HistoryPage> {
        let mut params = vec![("channel", channel), ("ts", thread_ts)];
        if let Some(c) = cursor {
            params.push(("cursor", c));
        }
        self.call("conversations.replies", &params).await
    }

    #[instrument(skip(self))]
    async fn resolve_single_message(&self, channel: &str, ts: &str) -> Result<HistoryPage> {
        let params = [
            ("channel", channel),
            ("ts", ts),
            ("latest", ts),
            ("inclusive", "true"),
            ("limit", "1"),
        ];
        self.call("conversations.replies", &params).await
    }
}
