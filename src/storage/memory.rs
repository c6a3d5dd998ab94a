use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::storage::models::{
    ActivityEntry, CrawlingStats, Job, JobProgress, JobStatus, NewSite, Page, PageUpsert,
    SearchParams, Site, SiteStats, SiteStatus,
};
use crate::storage::store::{
    content_hash, validate_page, validate_site, CrawlStore, StorageError, StoreResult,
};

#[derive(Default)]
struct MemoryState {
    sites: HashMap<Uuid, Site>,
    /// Pages keyed by URL; the URL is globally unique.
    pages: HashMap<String, Page>,
    jobs: HashMap<Uuid, Job>,
}

/// In-memory store backend.
///
/// Holds everything in lock-guarded maps. Used by the `memory` storage
/// profile and throughout the test suite; it honors the same contract the
/// SQLite backend does, including job transition rules and cascade deletes.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CrawlStore for MemoryStore {
    async fn create_site(&self, attrs: NewSite) -> StoreResult<Site> {
        validate_site(&attrs)?;
        let mut state = self.state.lock().await;
        if state.sites.values().any(|s| s.base_url == attrs.base_url) {
            return Err(StorageError::DuplicateSite(attrs.base_url));
        }

        let now = Utc::now();
        let site = Site {
            id: Uuid::new_v4(),
            name: attrs.name,
            base_url: attrs.base_url,
            crawler_id: attrs.crawler_id,
            config: attrs.config,
            status: SiteStatus::Active,
            last_crawled_at: None,
            pages_count: 0,
            errors_count: 0,
            created_at: now,
            updated_at: now,
        };
        state.sites.insert(site.id, site.clone());
        Ok(site)
    }

    async fn get_site(&self, id: Uuid) -> StoreResult<Option<Site>> {
        Ok(self.state.lock().await.sites.get(&id).cloned())
    }

    async fn get_site_by_url(&self, base_url: &str) -> StoreResult<Option<Site>> {
        let state = self.state.lock().await;
        Ok(state
            .sites
            .values()
            .find(|s| s.base_url == base_url)
            .cloned())
    }

    async fn list_sites(&self) -> StoreResult<Vec<Site>> {
        let state = self.state.lock().await;
        let mut sites: Vec<Site> = state.sites.values().cloned().collect();
        sites.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sites)
    }

    async fn delete_site(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.sites.remove(&id).is_none() {
            return Err(StorageError::SiteNotFound(id));
        }
        state.pages.retain(|_, p| p.site_id != id);
        state.jobs.retain(|_, j| j.site_id != id);
        Ok(())
    }

    async fn upsert_page(&self, attrs: PageUpsert) -> StoreResult<Page> {
        validate_page(&attrs)?;
        let mut state = self.state.lock().await;
        if !state.sites.contains_key(&attrs.site_id) {
            return Err(StorageError::SiteNotFound(attrs.site_id));
        }

        let now = Utc::now();
        let hash = attrs.content.as_deref().map(content_hash);

        let page = match state.pages.get(&attrs.url) {
            Some(existing) => Page {
                id: existing.id,
                site_id: attrs.site_id,
                url: attrs.url.clone(),
                title: attrs.title,
                content: attrs.content,
                content_hash: hash,
                metadata: attrs.metadata,
                status_code: attrs.status_code,
                content_type: attrs.content_type,
                content_size: attrs.content_size,
                crawled_at: now,
                created_at: existing.created_at,
                updated_at: now,
            },
            None => Page {
                id: Uuid::new_v4(),
                site_id: attrs.site_id,
                url: attrs.url.clone(),
                title: attrs.title,
                content: attrs.content,
                content_hash: hash,
                metadata: attrs.metadata,
                status_code: attrs.status_code,
                content_type: attrs.content_type,
                content_size: attrs.content_size,
                crawled_at: now,
                created_at: now,
                updated_at: now,
            },
        };

        let inserted = state
            .pages
            .insert(attrs.url.clone(), page.clone())
            .is_none();
        if let Some(site) = state.sites.get_mut(&attrs.site_id) {
            if inserted {
                site.pages_count += 1;
            }
            site.last_crawled_at = Some(now);
            site.updated_at = now;
        }
        Ok(page)
    }

    async fn get_page_by_url(&self, url: &str) -> StoreResult<Option<Page>> {
        Ok(self.state.lock().await.pages.get(url).cloned())
    }

    async fn list_pages_for_site(
        &self,
        site_id: Uuid,
        page: u32,
        per_page: u32,
    ) -> StoreResult<Vec<Page>> {
        let state = self.state.lock().await;
        let mut pages: Vec<Page> = state
            .pages
            .values()
            .filter(|p| p.site_id == site_id)
            .cloned()
            .collect();
        pages.sort_by(|a, b| b.crawled_at.cmp(&a.crawled_at));

        let params = SearchParams {
            site_id: Some(site_id),
            page,
            per_page,
        };
        Ok(pages
            .into_iter()
            .skip(params.offset() as usize)
            .take(params.per_page() as usize)
            .collect())
    }

    async fn search_pages(&self, query: &str, params: SearchParams) -> StoreResult<Vec<Page>> {
        let state = self.state.lock().await;
        let needle = query.to_lowercase();
        let mut hits: Vec<Page> = state
            .pages
            .values()
            .filter(|p| params.site_id.map_or(true, |id| p.site_id == id))
            .filter(|p| {
                p.url.to_lowercase().contains(&needle)
                    || p.title
                        .as_deref()
                        .is_some_and(|t| t.to_lowercase().contains(&needle))
                    || p.content
                        .as_deref()
                        .is_some_and(|c| c.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.crawled_at.cmp(&a.crawled_at));

        Ok(hits
            .into_iter()
            .skip(params.offset() as usize)
            .take(params.per_page() as usize)
            .collect())
    }

    async fn create_job(&self, site_id: Uuid, config: Value) -> StoreResult<Job> {
        let mut state = self.state.lock().await;
        if !state.sites.contains_key(&site_id) {
            return Err(StorageError::SiteNotFound(site_id));
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            site_id,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            pages_crawled: 0,
            pages_found: 0,
            errors_count: 0,
            error_details: None,
            config,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn start_job(&self, id: Uuid) -> StoreResult<Job> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(StorageError::JobNotFound(id))?;
        if !job.status.can_transition_to(JobStatus::Running) {
            return Err(StorageError::InvalidTransition {
                from: job.status,
                to: JobStatus::Running,
            });
        }

        let now = Utc::now();
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.pages_crawled = 0;
        job.pages_found = 0;
        job.errors_count = 0;
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn update_job_progress(&self, id: Uuid, progress: JobProgress) -> StoreResult<Job> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(StorageError::JobNotFound(id))?;
        if job.status != JobStatus::Running {
            return Err(StorageError::Validation(format!(
                "cannot update progress of a {} job",
                job.status
            )));
        }

        if let Some(crawled) = progress.pages_crawled {
            job.pages_crawled = crawled;
        }
        if let Some(found) = progress.pages_found {
            job.pages_found = found;
        }
        if let Some(errors) = progress.errors_count {
            job.errors_count = errors;
        }
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn complete_job(&self, id: Uuid, final_status: JobStatus) -> StoreResult<Job> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(StorageError::JobNotFound(id))?;
        if !job.status.can_transition_to(final_status) {
            return Err(StorageError::InvalidTransition {
                from: job.status,
                to: final_status,
            });
        }

        let now = Utc::now();
        job.status = final_status;
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn add_job_error(&self, id: Uuid, message: &str) -> StoreResult<Job> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Err(StorageError::JobNotFound(id));
        };

        job.errors_count += 1;
        job.error_details = Some(match job.error_details.take() {
            Some(existing) => format!("{}\n{}", existing, message),
            None => message.to_string(),
        });
        job.updated_at = Utc::now();

        let site_id = job.site_id;
        let job = job.clone();
        if let Some(site) = state.sites.get_mut(&site_id) {
            site.errors_count += 1;
        }
        Ok(job)
    }

    async fn get_crawling_stats(&self) -> StoreResult<CrawlingStats> {
        let state = self.state.lock().await;
        Ok(CrawlingStats {
            total_sites: state.sites.len() as u64,
            total_pages: state.pages.len() as u64,
            total_jobs: state.jobs.len() as u64,
            running_jobs: state
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Running)
                .count() as u64,
            failed_jobs: state
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Failed)
                .count() as u64,
        })
    }

    async fn get_site_stats(&self, site_id: Uuid) -> StoreResult<SiteStats> {
        let state = self.state.lock().await;
        let site = state
            .sites
            .get(&site_id)
            .ok_or(StorageError::SiteNotFound(site_id))?;
        Ok(SiteStats {
            site_id,
            pages_count: site.pages_count,
            errors_count: site.errors_count,
            last_crawled_at: site.last_crawled_at,
            completed_jobs: state
                .jobs
                .values()
                .filter(|j| j.site_id == site_id && j.status == JobStatus::Completed)
                .count() as u64,
        })
    }

    async fn get_recent_activity(&self, limit: usize) -> StoreResult<Vec<ActivityEntry>> {
        let state = self.state.lock().await;
        let mut pages: Vec<&Page> = state.pages.values().collect();
        pages.sort_by(|a, b| b.crawled_at.cmp(&a.crawled_at));
        Ok(pages
            .into_iter()
            .take(limit)
            .map(|p| ActivityEntry {
                url: p.url.clone(),
                site_id: p.site_id,
                title: p.title.clone(),
                status_code: p.status_code,
                crawled_at: p.crawled_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store_with_site() -> (MemoryStore, Site) {
        let store = MemoryStore::new();
        let site = store
            .create_site(NewSite {
                name: "Example".into(),
                base_url: "https://example.com".into(),
                crawler_id: "site".into(),
                config: json!({}),
            })
            .await
            .unwrap();
        (store, site)
    }

    fn page_attrs(site_id: Uuid, url: &str, content: &str) -> PageUpsert {
        PageUpsert {
            site_id,
            url: url.into(),
            title: Some("Example".into()),
            content: Some(content.into()),
            metadata: json!({}),
            status_code: Some(200),
            content_type: Some("text/html".into()),
            content_size: Some(content.len() as u64),
        }
    }

    #[tokio::test]
    async fn duplicate_base_url_is_rejected() {
        let (store, _) = store_with_site().await;
        let err = store
            .create_site(NewSite {
                name: "Again".into(),
                base_url: "https://example.com".into(),
                crawler_id: "site".into(),
                config: json!({}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateSite(_)));
    }

    #[tokio::test]
    async fn upsert_inserts_then_replaces() {
        let (store, site) = store_with_site().await;

        let first = store
            .upsert_page(page_attrs(site.id, "https://example.com/a", "Hello"))
            .await
            .unwrap();
        assert_eq!(
            first.content_hash.as_deref(),
            Some("185f8db32271fe25f561a6fc938b2e264306ec304eda518007d1764826381969")
        );

        let second = store
            .upsert_page(page_attrs(site.id, "https://example.com/a", "Changed"))
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_ne!(second.content_hash, first.content_hash);

        // URL uniqueness holds: still one page, counted once.
        let site = store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(site.pages_count, 1);
        assert!(site.last_crawled_at.is_some());
    }

    #[tokio::test]
    async fn identical_content_hashes_identically() {
        let (store, site) = store_with_site().await;
        let first = store
            .upsert_page(page_attrs(site.id, "https://example.com/a", "same"))
            .await
            .unwrap();
        let second = store
            .upsert_page(page_attrs(site.id, "https://example.com/a", "same"))
            .await
            .unwrap();
        assert_eq!(first.content_hash, second.content_hash);
    }

    #[tokio::test]
    async fn job_lifecycle_is_monotone() {
        let (store, site) = store_with_site().await;
        let job = store.create_job(site.id, json!({})).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        // Completing a pending job is rejected.
        let err = store
            .complete_job(job.id, JobStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { .. }));

        let started = store.start_job(job.id).await.unwrap();
        assert_eq!(started.status, JobStatus::Running);
        assert!(started.started_at.is_some());

        let updated = store
            .update_job_progress(
                job.id,
                JobProgress {
                    pages_crawled: Some(5),
                    pages_found: Some(9),
                    errors_count: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.pages_crawled, 5);
        assert_eq!(updated.pages_found, 9);

        let done = store.complete_job(job.id, JobStatus::Completed).await.unwrap();
        assert!(done.completed_at.is_some());

        // Terminal states are immutable.
        assert!(store.start_job(job.id).await.is_err());
        assert!(store
            .complete_job(job.id, JobStatus::Failed)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn job_errors_append_with_newlines() {
        let (store, site) = store_with_site().await;
        let job = store.create_job(site.id, json!({})).await.unwrap();
        store.start_job(job.id).await.unwrap();

        store.add_job_error(job.id, "first failure").await.unwrap();
        let job = store.add_job_error(job.id, "second failure").await.unwrap();

        assert_eq!(job.errors_count, 2);
        assert_eq!(
            job.error_details.as_deref(),
            Some("first failure\nsecond failure")
        );

        // Appending stays legal after completion.
        store.complete_job(job.id, JobStatus::Failed).await.unwrap();
        let job = store.add_job_error(job.id, "post-mortem").await.unwrap();
        assert_eq!(job.errors_count, 3);
    }

    #[tokio::test]
    async fn search_filters_and_paginates() {
        let (store, site) = store_with_site().await;
        for i in 0..5 {
            store
                .upsert_page(page_attrs(
                    site.id,
                    &format!("https://example.com/doc/{}", i),
                    &format!("common text {}", i),
                ))
                .await
                .unwrap();
        }
        store
            .upsert_page(page_attrs(site.id, "https://example.com/other", "different"))
            .await
            .unwrap();

        let hits = store
            .search_pages("common", SearchParams::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 5);

        let first_page = store
            .search_pages(
                "common",
                SearchParams {
                    site_id: Some(site.id),
                    page: 1,
                    per_page: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(first_page.len(), 2);

        let third_page = store
            .search_pages(
                "common",
                SearchParams {
                    site_id: Some(site.id),
                    page: 3,
                    per_page: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(third_page.len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_site_cascades() {
        let (store, site) = store_with_site().await;
        store
            .upsert_page(page_attrs(site.id, "https://example.com/a", "x"))
            .await
            .unwrap();
        let job = store.create_job(site.id, json!({})).await.unwrap();

        store.delete_site(site.id).await.unwrap();

        assert!(store.get_site(site.id).await.unwrap().is_none());
        assert!(store
            .get_page_by_url("https://example.com/a")
            .await
            .unwrap()
            .is_none());
        assert!(store.get_job(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stats_reflect_store_contents() {
        let (store, site) = store_with_site().await;
        store
            .upsert_page(page_attrs(site.id, "https://example.com/a", "x"))
            .await
            .unwrap();
        let job = store.create_job(site.id, json!({})).await.unwrap();
        store.start_job(job.id).await.unwrap();

        let stats = store.get_crawling_stats().await.unwrap();
        assert_eq!(stats.total_sites, 1);
        assert_eq!(stats.total_pages, 1);
        assert_eq!(stats.running_jobs, 1);

        let site_stats = store.get_site_stats(site.id).await.unwrap();
        assert_eq!(site_stats.pages_count, 1);

        let activity = store.get_recent_activity(10).await.unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].url, "https://example.com/a");
    }
}
