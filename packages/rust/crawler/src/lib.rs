//! Chat transport, message extraction, and thread resolution.
//!
//! This crate provides:
//! - [`ChatTransport`]: the paginated chat-history contract
//! - [`SlackClient`]: the Slack Web API implementation of it
//! - [`extract`]: attachment, URL, and mention extraction
//! - [`normalize`]: raw message → [`ParsedMessage`](threadcrawl_shared::ParsedMessage)
//! - [`resolver`]: canonical single-message re-fetch

pub mod extract;
pub mod normalize;
pub mod resolver;
pub mod slack;
pub mod transport;

pub use extract::{embedded_urls, extract_attachments, extract_urls, mentioned_user_ids};
pub use normalize::{message_id, normalize};
pub use resolver::resolve_canonical;
pub use slack::{DEFAULT_API_BASE_URL, SlackClient};
pub use transport::ChatTransport;
