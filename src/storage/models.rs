use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Operational status of a configured site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Active,
    Inactive,
    Paused,
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteStatus::Active => write!(f, "active"),
            SiteStatus::Inactive => write!(f, "inactive"),
            SiteStatus::Paused => write!(f, "paused"),
        }
    }
}

impl std::str::FromStr for SiteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SiteStatus::Active),
            "inactive" => Ok(SiteStatus::Inactive),
            "paused" => Ok(SiteStatus::Paused),
            other => Err(format!("unknown site status: {}", other)),
        }
    }
}

/// Crawler configuration root for one target site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    pub name: String,

    /// Unique root URL for the site
    pub base_url: String,

    /// Identifier of the crawler implementation bound to this site
    pub crawler_id: String,

    /// Opaque configuration consumed by the crawler
    pub config: Value,

    pub status: SiteStatus,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub pages_count: u64,
    pub errors_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attributes for creating a site
#[derive(Debug, Clone)]
pub struct NewSite {
    pub name: String,
    pub base_url: String,
    pub crawler_id: String,
    pub config: Value,
}

/// A persisted crawled page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: Uuid,
    pub site_id: Uuid,

    /// Globally unique page URL
    pub url: String,

    pub title: Option<String>,
    pub content: Option<String>,

    /// Lowercase hex SHA-256 of the content, recomputed on every upsert
    pub content_hash: Option<String>,

    /// Free-form key/value metadata from extraction
    pub metadata: Value,

    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub content_size: Option<u64>,
    pub crawled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attributes for upserting a page; the store computes the content hash
#[derive(Debug, Clone)]
pub struct PageUpsert {
    pub site_id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub metadata: Value,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub content_size: Option<u64>,
}

/// Lifecycle status of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Transitions are monotone: pending -> running -> a terminal state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => next == JobStatus::Running,
            JobStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Audit and progress record for one crawl run of a site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub site_id: Uuid,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pages_crawled: u64,
    pub pages_found: u64,
    pub errors_count: u64,

    /// Newline-joined error messages, append-only
    pub error_details: Option<String>,

    pub config: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial progress update for a running job; absent fields are untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct JobProgress {
    pub pages_crawled: Option<u64>,
    pub pages_found: Option<u64>,
    pub errors_count: Option<u64>,
}

/// Pagination and scoping for page searches
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub site_id: Option<Uuid>,
    pub page: u32,
    pub per_page: u32,
}

impl SearchParams {
    pub fn offset(&self) -> u32 {
        self.page.saturating_sub(1).saturating_mul(self.per_page())
    }

    pub fn per_page(&self) -> u32 {
        if self.per_page == 0 {
            20
        } else {
            self.per_page
        }
    }
}

/// Store-wide aggregates for the status surface
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CrawlingStats {
    pub total_sites: u64,
    pub total_pages: u64,
    pub total_jobs: u64,
    pub running_jobs: u64,
    pub failed_jobs: u64,
}

/// Per-site aggregates
#[derive(Debug, Clone, Serialize)]
pub struct SiteStats {
    pub site_id: Uuid,
    pub pages_count: u64,
    pub errors_count: u64,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub completed_jobs: u64,
}

/// A recently crawled page, for the activity feed
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub url: String,
    pub site_id: Uuid,
    pub title: Option<String>,
    pub status_code: Option<u16>,
    pub crawled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_transitions_are_monotone() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));

        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));

        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(JobStatus::Running));
            assert!(!terminal.can_transition_to(JobStatus::Pending));
        }
    }

    #[test]
    fn search_params_paginate_from_one() {
        let params = SearchParams {
            site_id: None,
            page: 3,
            per_page: 25,
        };
        assert_eq!(params.offset(), 50);

        let defaulted = SearchParams::default();
        assert_eq!(defaulted.per_page(), 20);
        assert_eq!(defaulted.offset(), 0);
    }
}
