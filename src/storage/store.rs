use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::storage::models::{
    ActivityEntry, CrawlingStats, Job, JobProgress, JobStatus, NewSite, Page, PageUpsert,
    SearchParams, Site, SiteStats,
};

/// Errors surfaced by persistence backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Site not found: {0}")]
    SiteNotFound(Uuid),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("A site already exists for base URL {0}")]
    DuplicateSite(String),

    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),
}

pub type StoreResult<T> = Result<T, StorageError>;

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// Lowercase hex SHA-256 of the content bytes.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Reject URLs that are not absolute http(s) URLs with a host.
pub fn validate_url(raw: &str) -> StoreResult<()> {
    let parsed = Url::parse(raw)
        .map_err(|e| StorageError::Validation(format!("invalid URL '{}': {}", raw, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(StorageError::Validation(format!(
            "unsupported scheme '{}' in {}",
            parsed.scheme(),
            raw
        )));
    }
    if parsed.host_str().is_none() {
        return Err(StorageError::Validation(format!("URL has no host: {}", raw)));
    }
    Ok(())
}

/// Validate page attributes before an upsert.
pub fn validate_page(attrs: &PageUpsert) -> StoreResult<()> {
    validate_url(&attrs.url)?;
    if let Some(code) = attrs.status_code {
        if code == 0 || code >= 600 {
            return Err(StorageError::Validation(format!(
                "status code out of range: {}",
                code
            )));
        }
    }
    Ok(())
}

/// Validate site attributes before creation.
pub fn validate_site(attrs: &NewSite) -> StoreResult<()> {
    validate_url(&attrs.base_url)?;
    if attrs.name.trim().is_empty() {
        return Err(StorageError::Validation("site name is empty".into()));
    }
    if attrs.crawler_id.trim().is_empty() {
        return Err(StorageError::Validation("crawler id is empty".into()));
    }
    Ok(())
}

/// Narrow persistence contract consumed by the crawl pipeline.
///
/// Backends are key-addressable stores honoring the site/page/job shapes;
/// the pipeline never depends on a specific database. Deleting a site
/// cascades to its pages and jobs.
#[async_trait]
pub trait CrawlStore: Send + Sync {
    // ===== Sites =====

    async fn create_site(&self, attrs: NewSite) -> StoreResult<Site>;

    async fn get_site(&self, id: Uuid) -> StoreResult<Option<Site>>;

    async fn get_site_by_url(&self, base_url: &str) -> StoreResult<Option<Site>>;

    async fn list_sites(&self) -> StoreResult<Vec<Site>>;

    async fn delete_site(&self, id: Uuid) -> StoreResult<()>;

    // ===== Pages =====

    /// Insert the page or replace the stored content, metadata, hash, and
    /// timestamps of the existing row with the same URL. The content hash is
    /// recomputed here on every call.
    async fn upsert_page(&self, attrs: PageUpsert) -> StoreResult<Page>;

    async fn get_page_by_url(&self, url: &str) -> StoreResult<Option<Page>>;

    async fn list_pages_for_site(
        &self,
        site_id: Uuid,
        page: u32,
        per_page: u32,
    ) -> StoreResult<Vec<Page>>;

    /// Substring search over URL, title, and content.
    async fn search_pages(&self, query: &str, params: SearchParams) -> StoreResult<Vec<Page>>;

    // ===== Jobs =====

    async fn create_job(&self, site_id: Uuid, config: Value) -> StoreResult<Job>;

    async fn get_job(&self, id: Uuid) -> StoreResult<Option<Job>>;

    /// Transition pending -> running, stamp `started_at`, zero the counters.
    async fn start_job(&self, id: Uuid) -> StoreResult<Job>;

    /// Apply the supplied counters to a running job; absent fields are left
    /// untouched.
    async fn update_job_progress(&self, id: Uuid, progress: JobProgress) -> StoreResult<Job>;

    /// Transition running -> a terminal status and stamp `completed_at`.
    async fn complete_job(&self, id: Uuid, final_status: JobStatus) -> StoreResult<Job>;

    /// Increment the job's error counter and append the message to its
    /// newline-joined error details. Allowed on terminal jobs.
    async fn add_job_error(&self, id: Uuid, message: &str) -> StoreResult<Job>;

    // ===== Read surfaces =====

    async fn get_crawling_stats(&self) -> StoreResult<CrawlingStats>;

    async fn get_site_stats(&self, site_id: Uuid) -> StoreResult<SiteStats>;

    async fn get_recent_activity(&self, limit: usize) -> StoreResult<Vec<ActivityEntry>>;
}

/// Shared handle to a store backend
pub type SharedStore = Arc<dyn CrawlStore>;

/// Factory for creating a store backend from configuration
pub struct StoreFactory;

impl StoreFactory {
    pub async fn create(
        settings: &crate::cli::config::StorageSettings,
    ) -> StoreResult<SharedStore> {
        use crate::cli::config::StorageBackend;
        use crate::storage::memory::MemoryStore;
        use crate::storage::sqlite::SqliteStore;

        match settings.backend {
            StorageBackend::Sqlite => Ok(Arc::new(
                SqliteStore::connect(&settings.database_path).await?,
            )),
            StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_lowercase_hex_sha256() {
        assert_eq!(
            content_hash("Hello"),
            "185f8db32271fe25f561a6fc938b2e264306ec304eda518007d1764826381969"
        );
        // Identical content always hashes identically.
        assert_eq!(content_hash("Hello"), content_hash("Hello"));
        assert_ne!(content_hash("Hello"), content_hash("hello"));
    }

    #[test]
    fn url_validation_requires_http_with_host() {
        assert!(validate_url("https://example.com/page").is_ok());
        assert!(validate_url("http://example.com").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("data:text/plain,hello").is_err());
    }

    #[test]
    fn page_validation_bounds_status_code() {
        let mut attrs = PageUpsert {
            site_id: Uuid::new_v4(),
            url: "https://example.com".into(),
            title: None,
            content: None,
            metadata: serde_json::json!({}),
            status_code: Some(200),
            content_type: None,
            content_size: None,
        };
        assert!(validate_page(&attrs).is_ok());

        attrs.status_code = Some(0);
        assert!(validate_page(&attrs).is_err());

        attrs.status_code = Some(600);
        assert!(validate_page(&attrs).is_err());

        attrs.status_code = Some(599);
        assert!(validate_page(&attrs).is_ok());
    }
}
