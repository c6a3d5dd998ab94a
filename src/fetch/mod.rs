pub mod http;

use async_trait::async_trait;

use crate::error::CrawlResult;

pub use http::HttpFetcher;

/// A fetched page, with content and links already extracted
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub url: String,

    pub status_code: u16,
    pub content_type: Option<String>,
    pub title: Option<String>,

    /// Visible text content, whitespace-normalized
    pub text: String,

    /// Absolute URLs discovered on the page
    pub links: Vec<String>,
}

/// Page retrieval contract.
///
/// Crawlers treat the fetcher as an opaque service returning extracted
/// content. Implementations own their sessions and must release them on
/// every exit path; failures surface as `CrawlError` values so the retry
/// classifier can act on them.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> CrawlResult<FetchedPage>;
}
