use thiserror::Error;

/// Failure reasons surfaced while processing a single URL.
///
/// Every reason the retry classifier distinguishes is a variant here, so the
/// transient/permanent decision is an exhaustive match rather than string
/// inspection scattered across the workers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CrawlError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: status {0}")]
    Http(u16),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Temporary failure: {0}")]
    Temporary(String),

    #[error("No crawler registered for id '{0}'")]
    InvalidCrawler(String),

    #[error("Content extraction failed for {url}: {message}")]
    Extraction { url: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Crawl aborted abnormally: {0}")]
    Panic(String),

    #[error("Invalid input: {0}")]
    Invalid(String),
}

impl CrawlError {
    /// Retry classification: transient failures are re-admitted to the queue
    /// (up to the retry ceiling), everything else fails the URL terminally.
    ///
    /// HTTP statuses are transient only from 500 upward; a 4xx will not
    /// change on a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            CrawlError::Timeout(_)
            | CrawlError::Network(_)
            | CrawlError::Browser(_)
            | CrawlError::Temporary(_) => true,
            CrawlError::Http(status) => *status >= 500,
            CrawlError::InvalidCrawler(_)
            | CrawlError::Extraction { .. }
            | CrawlError::Storage(_)
            | CrawlError::Panic(_)
            | CrawlError::Invalid(_) => false,
        }
    }
}

/// Result alias used throughout the crawl path.
pub type CrawlResult<T> = Result<T, CrawlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_reasons_are_retryable() {
        assert!(CrawlError::Timeout("fetch".into()).is_retryable());
        assert!(CrawlError::Network("connection reset".into()).is_retryable());
        assert!(CrawlError::Browser("session lost".into()).is_retryable());
        assert!(CrawlError::Temporary("overloaded".into()).is_retryable());
        assert!(CrawlError::Http(500).is_retryable());
        assert!(CrawlError::Http(503).is_retryable());
    }

    #[test]
    fn permanent_reasons_are_not_retryable() {
        assert!(!CrawlError::Http(404).is_retryable());
        assert!(!CrawlError::Http(499).is_retryable());
        assert!(!CrawlError::InvalidCrawler("nope".into()).is_retryable());
        assert!(!CrawlError::Panic("worker died".into()).is_retryable());
        assert!(!CrawlError::Storage("disk full".into()).is_retryable());
        assert!(!CrawlError::Extraction {
            url: "https://example.com".into(),
            message: "bad html".into()
        }
        .is_retryable());
    }
}
