//! Crawl orchestration for threadcrawl.
//!
//! This crate ties the chat transport, content enrichment, document assembly
//! and the search index together into [`Crawler::crawl_channel`].

pub mod assembler;
pub mod caption;
pub mod enrichment;
pub mod pipeline;

pub use assembler::assemble_documents;
pub use caption::{CaptionBridge, DEFAULT_CAPTION_TIMEOUT, DisabledCaptioner};
pub use enrichment::{
    BytesFetcher, ContentEnricher, EnrichmentSource, HttpFetcher, ImageCaptioner,
    PageTextExtractor, is_image_url,
};
pub use pipeline::{CrawlProgress, CrawlState, CrawlSummary, Crawler, DocumentIndex, SilentProgress};
