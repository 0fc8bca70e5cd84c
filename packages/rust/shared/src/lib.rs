//! Shared types, error model, and configuration for threadcrawl.
//!
//! This crate is the foundation depended on by all other threadcrawl crates.
//! It provides:
//! - [`ThreadCrawlError`]: the unified error type
//! - Domain types ([`RawMessage`], [`ParsedMessage`], [`IndexableDocument`], ...)
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ChannelEntry, DEFAULT_MAX_CHARS, EnrichmentConfig, IndexConfig, SlackConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_token,
};
pub use error::{Result, ThreadCrawlError};
pub use types::{
    Attachment, CursorMetadata, EnrichedFragment, HistoryPage, IndexableDocument, ParsedMessage,
    RawAttachment, RawFile, RawMessage, WebpageText,
};
