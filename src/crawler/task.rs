use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// A unit of crawling work flowing through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Absolute URL to crawl; the queue keys deduplication on this string
    pub url: String,

    /// Identifier of the crawler implementation bound to this item
    pub crawler_id: String,

    /// Priority of this item (higher values are dequeued first)
    pub priority: i32,

    /// Number of prior attempts (0 on first admission)
    pub retries: u32,

    /// Admission timestamp, used only for FIFO ordering within a priority band
    pub added_at: DateTime<Utc>,
}

impl WorkItem {
    /// Create a fresh work item with default priority and no prior attempts
    pub fn new(url: impl Into<String>, crawler_id: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().to_string(),
            crawler_id: crawler_id.into(),
            priority: 0,
            retries: 0,
            added_at: Utc::now(),
        }
    }

    /// Create a work item with an explicit priority
    pub fn with_priority(
        url: impl Into<String>,
        crawler_id: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            priority,
            ..Self::new(url, crawler_id)
        }
    }

    /// Synthesize the retry successor of this item, bumping the attempt count
    /// while preserving the crawler binding and priority.
    pub fn retry(&self) -> Self {
        Self {
            url: self.url.clone(),
            crawler_id: self.crawler_id.clone(),
            priority: self.priority,
            retries: self.retries + 1,
            added_at: Utc::now(),
        }
    }
}
