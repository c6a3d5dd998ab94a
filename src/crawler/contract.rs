use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CrawlError, CrawlResult};
use crate::fetch::FetchedPage;

/// What to do with a URL after its crawl failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Re-admit the URL, subject to the retry ceiling
    Retry,
    /// Fail the URL terminally and move on
    Skip,
    /// Fail the URL and shut the pipeline down
    Stop,
}

/// Content extracted from a fetched page, ready for persistence
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub title: Option<String>,
    pub content: Option<String>,
    pub metadata: Value,
    pub content_type: Option<String>,
    pub status_code: Option<u16>,
    pub content_size: Option<u64>,
}

/// Contract every site-specific crawler implements.
///
/// Implementations are resolved by id through the [`CrawlerRegistry`]
/// (populated at startup; resolution failure is a permanent per-item error)
/// and invoked by pipeline workers. `crawl` owns the whole per-URL flow:
/// fetch, extract, persist, and enqueue discovered links.
///
/// [`CrawlerRegistry`]: crate::crawler::registry::CrawlerRegistry
#[async_trait]
pub trait Crawler: Send + Sync {
    /// Stable identifier work items are bound to
    fn id(&self) -> &str;

    /// Seed the initial URLs into the queue. Idempotent: re-seeding an
    /// already-known URL is dropped by queue admission.
    async fn init(&self) -> CrawlResult<()>;

    /// Process one URL end to end.
    async fn crawl(&self, url: &str) -> CrawlResult<()>;

    /// The unordered set of absolute URLs discovered on a fetched page.
    fn extract_links(&self, page: &FetchedPage) -> HashSet<String>;

    /// The persistable content record for a fetched page.
    fn extract_content(&self, page: &FetchedPage, url: &str) -> ExtractedContent;

    /// Admission filter applied to discovered URLs.
    fn should_crawl_url(&self, url: &str) -> bool;

    /// The crawler's effective configuration.
    fn config(&self) -> Value;

    /// Classify a failure. The default delegates to the retry classifier;
    /// implementations may override to force a retry, a skip, or a full
    /// pipeline stop.
    fn handle_error(&self, _url: &str, err: &CrawlError) -> ErrorAction {
        if err.is_retryable() {
            ErrorAction::Retry
        } else {
            ErrorAction::Skip
        }
    }
}
