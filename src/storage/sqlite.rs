use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::storage::models::{
    ActivityEntry, CrawlingStats, Job, JobProgress, JobStatus, NewSite, Page, PageUpsert,
    SearchParams, Site, SiteStats, SiteStatus,
};
use crate::storage::store::{
    content_hash, validate_page, validate_site, CrawlStore, StorageError, StoreResult,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sites (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        base_url TEXT NOT NULL UNIQUE,
        crawler_id TEXT NOT NULL,
        config TEXT NOT NULL,
        status TEXT NOT NULL,
        last_crawled_at TEXT,
        pages_count INTEGER NOT NULL DEFAULT 0,
        errors_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pages (
        id TEXT PRIMARY KEY,
        site_id TEXT NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
        url TEXT NOT NULL UNIQUE,
        title TEXT,
        content TEXT,
        content_hash TEXT,
        metadata TEXT NOT NULL,
        status_code INTEGER,
        content_type TEXT,
        content_size INTEGER,
        crawled_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_pages_site_id ON pages(site_id)",
    "CREATE INDEX IF NOT EXISTS idx_pages_crawled_at ON pages(crawled_at)",
    "CREATE INDEX IF NOT EXISTS idx_pages_content_hash ON pages(content_hash)",
    "CREATE INDEX IF NOT EXISTS idx_pages_status_code ON pages(status_code)",
    "CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        site_id TEXT NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
        status TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        pages_crawled INTEGER NOT NULL DEFAULT 0,
        pages_found INTEGER NOT NULL DEFAULT 0,
        errors_count INTEGER NOT NULL DEFAULT 0,
        error_details TEXT,
        config TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_site_id ON jobs(site_id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_started_at ON jobs(started_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_completed_at ON jobs(completed_at)",
];

/// SQLite store backend.
///
/// Timestamps are stored as RFC 3339 text, ids as UUID strings, and the
/// free-form config/metadata columns as JSON text. Cascade from sites to
/// pages and jobs is enforced by foreign keys.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and ensure the
    /// schema exists.
    pub async fn connect(path: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        debug!("Connected to SQLite database: {}", path);
        Ok(store)
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn fetch_site(&self, id: Uuid) -> StoreResult<Option<Site>> {
        let row = sqlx::query("SELECT * FROM sites WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_site(&r)).transpose()
    }

    async fn fetch_job(&self, id: Uuid) -> StoreResult<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => row_to_job(&r),
            None => Err(StorageError::JobNotFound(id)),
        }
    }
}

fn parse_ts(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Database(format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_opt_ts(raw: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_id(raw: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StorageError::Database(format!("bad uuid '{}': {}", raw, e)))
}

fn parse_json(raw: &str) -> StoreResult<Value> {
    serde_json::from_str(raw).map_err(|e| StorageError::Database(format!("bad json: {}", e)))
}

fn row_to_site(row: &SqliteRow) -> StoreResult<Site> {
    let status: String = row.try_get("status")?;
    Ok(Site {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        base_url: row.try_get("base_url")?,
        crawler_id: row.try_get("crawler_id")?,
        config: parse_json(&row.try_get::<String, _>("config")?)?,
        status: status
            .parse::<SiteStatus>()
            .map_err(StorageError::Database)?,
        last_crawled_at: parse_opt_ts(row.try_get("last_crawled_at")?)?,
        pages_count: row.try_get::<i64, _>("pages_count")? as u64,
        errors_count: row.try_get::<i64, _>("errors_count")? as u64,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn row_to_page(row: &SqliteRow) -> StoreResult<Page> {
    Ok(Page {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        site_id: parse_id(&row.try_get::<String, _>("site_id")?)?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        content_hash: row.try_get("content_hash")?,
        metadata: parse_json(&row.try_get::<String, _>("metadata")?)?,
        status_code: row
            .try_get::<Option<i64>, _>("status_code")?
            .map(|c| c as u16),
        content_type: row.try_get("content_type")?,
        content_size: row
            .try_get::<Option<i64>, _>("content_size")?
            .map(|s| s as u64),
        crawled_at: parse_ts(&row.try_get::<String, _>("crawled_at")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn row_to_job(row: &SqliteRow) -> StoreResult<Job> {
    let status: String = row.try_get("status")?;
    Ok(Job {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        site_id: parse_id(&row.try_get::<String, _>("site_id")?)?,
        status: status.parse::<JobStatus>().map_err(StorageError::Database)?,
        started_at: parse_opt_ts(row.try_get("started_at")?)?,
        completed_at: parse_opt_ts(row.try_get("completed_at")?)?,
        pages_crawled: row.try_get::<i64, _>("pages_crawled")? as u64,
        pages_found: row.try_get::<i64, _>("pages_found")? as u64,
        errors_count: row.try_get::<i64, _>("errors_count")? as u64,
        error_details: row.try_get("error_details")?,
        config: parse_json(&row.try_get::<String, _>("config")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
    })
}

#[async_trait]
impl CrawlStore for SqliteStore {
    async fn create_site(&self, attrs: NewSite) -> StoreResult<Site> {
        validate_site(&attrs)?;
        if self.get_site_by_url(&attrs.base_url).await?.is_some() {
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

        sqlx::query(
            "INSERT INTO sites (id, name, base_url, crawler_id, config, status,
                                pages_count, errors_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7, ?7)",
        )
        .bind(site.id.to_string())
        .bind(&site.name)
        .bind(&site.base_url)
        .bind(&site.crawler_id)
        .bind(site.config.to_string())
        .bind(site.status.to_string())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(site)
    }

    async fn get_site(&self, id: Uuid) -> StoreResult<Option<Site>> {
        self.fetch_site(id).await
    }

    async fn get_site_by_url(&self, base_url: &str) -> StoreResult<Option<Site>> {
        let row = sqlx::query("SELECT * FROM sites WHERE base_url = ?1")
            .bind(base_url)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_site(&r)).transpose()
    }

    async fn list_sites(&self) -> StoreResult<Vec<Site>> {
        let rows = sqlx::query("SELECT * FROM sites ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_site).collect()
    }

    async fn delete_site(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM sites WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::SiteNotFound(id));
        }
        Ok(())
    }

    async fn upsert_page(&self, attrs: PageUpsert) -> StoreResult<Page> {
        validate_page(&attrs)?;
        if self.fetch_site(attrs.site_id).await?.is_none() {
            return Err(StorageError::SiteNotFound(attrs.site_id));
        }

        let now = Utc::now();
        let hash = attrs.content.as_deref().map(content_hash);
        let existing: Option<String> = sqlx::query_scalar("SELECT id FROM pages WHERE url = ?1")
            .bind(&attrs.url)
            .fetch_optional(&self.pool)
            .await?;
        let is_insert = existing.is_none();
        let id = match existing {
            Some(raw) => parse_id(&raw)?,
            None => Uuid::new_v4(),
        };

        sqlx::query(
            "INSERT INTO pages (id, site_id, url, title, content, content_hash, metadata,
                                status_code, content_type, content_size,
                                crawled_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11, ?11)
             ON CONFLICT(url) DO UPDATE SET
                site_id = excluded.site_id,
                title = excluded.title,
                content = excluded.content,
                content_hash = excluded.content_hash,
                metadata = excluded.metadata,
                status_code = excluded.status_code,
                content_type = excluded.content_type,
                content_size = excluded.content_size,
                crawled_at = excluded.crawled_at,
                updated_at = excluded.updated_at",
        )
        .bind(id.to_string())
        .bind(attrs.site_id.to_string())
        .bind(&attrs.url)
        .bind(&attrs.title)
        .bind(&attrs.content)
        .bind(&hash)
        .bind(attrs.metadata.to_string())
        .bind(attrs.status_code.map(|c| c as i64))
        .bind(&attrs.content_type)
        .bind(attrs.content_size.map(|s| s as i64))
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let pages_delta = if is_insert { 1 } else { 0 };
        sqlx::query(
            "UPDATE sites SET pages_count = pages_count + ?1,
                              last_crawled_at = ?2, updated_at = ?2
             WHERE id = ?3",
        )
        .bind(pages_delta)
        .bind(now.to_rfc3339())
        .bind(attrs.site_id.to_string())
        .execute(&self.pool)
        .await?;

        match self.get_page_by_url(&attrs.url).await? {
            Some(page) => Ok(page),
            None => Err(StorageError::Database(format!(
                "page vanished after upsert: {}",
                attrs.url
            ))),
        }
    }

    async fn get_page_by_url(&self, url: &str) -> StoreResult<Option<Page>> {
        let row = sqlx::query("SELECT * FROM pages WHERE url = ?1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_page(&r)).transpose()
    }

    async fn list_pages_for_site(
        &self,
        site_id: Uuid,
        page: u32,
        per_page: u32,
    ) -> StoreResult<Vec<Page>> {
        let params = SearchParams {
            site_id: Some(site_id),
            page,
            per_page,
        };
        let rows = sqlx::query(
            "SELECT * FROM pages WHERE site_id = ?1
             ORDER BY crawled_at DESC LIMIT ?2 OFFSET ?3",
        )
        .bind(site_id.to_string())
        .bind(params.per_page() as i64)
        .bind(params.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_page).collect()
    }

    async fn search_pages(&self, query: &str, params: SearchParams) -> StoreResult<Vec<Page>> {
        let pattern = format!("%{}%", query);
        let rows = match params.site_id {
            Some(site_id) => {
                sqlx::query(
                    "SELECT * FROM pages
                     WHERE site_id = ?1
                       AND (url LIKE ?2 OR IFNULL(title, '') LIKE ?2
                            OR IFNULL(content, '') LIKE ?2)
                     ORDER BY crawled_at DESC LIMIT ?3 OFFSET ?4",
                )
                .bind(site_id.to_string())
                .bind(&pattern)
                .bind(params.per_page() as i64)
                .bind(params.offset() as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM pages
                     WHERE url LIKE ?1 OR IFNULL(title, '') LIKE ?1
                           OR IFNULL(content, '') LIKE ?1
                     ORDER BY crawled_at DESC LIMIT ?2 OFFSET ?3",
                )
                .bind(&pattern)
                .bind(params.per_page() as i64)
                .bind(params.offset() as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_page).collect()
    }

    async fn create_job(&self, site_id: Uuid, config: Value) -> StoreResult<Job> {
        if self.fetch_site(site_id).await?.is_none() {
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

        sqlx::query(
            "INSERT INTO jobs (id, site_id, status, pages_crawled, pages_found,
                               errors_count, config, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, 0, 0, ?4, ?5, ?5)",
        )
        .bind(job.id.to_string())
        .bind(site_id.to_string())
        .bind(job.status.to_string())
        .bind(job.config.to_string())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    async fn start_job(&self, id: Uuid) -> StoreResult<Job> {
        let job = self.fetch_job(id).await?;
        if !job.status.can_transition_to(JobStatus::Running) {
            return Err(StorageError::InvalidTransition {
                from: job.status,
                to: JobStatus::Running,
            });
        }

        let now = Utc::now();
        sqlx::query(
            "UPDATE jobs SET status = ?1, started_at = ?2, updated_at = ?2,
                             pages_crawled = 0, pages_found = 0, errors_count = 0
             WHERE id = ?3",
        )
        .bind(JobStatus::Running.to_string())
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.fetch_job(id).await
    }

    async fn update_job_progress(&self, id: Uuid, progress: JobProgress) -> StoreResult<Job> {
        let job = self.fetch_job(id).await?;
        if job.status != JobStatus::Running {
            return Err(StorageError::Validation(format!(
                "cannot update progress of a {} job",
                job.status
            )));
        }

        sqlx::query(
            "UPDATE jobs SET pages_crawled = ?1, pages_found = ?2,
                             errors_count = ?3, updated_at = ?4
             WHERE id = ?5",
        )
        .bind(progress.pages_crawled.unwrap_or(job.pages_crawled) as i64)
        .bind(progress.pages_found.unwrap_or(job.pages_found) as i64)
        .bind(progress.errors_count.unwrap_or(job.errors_count) as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.fetch_job(id).await
    }

    async fn complete_job(&self, id: Uuid, final_status: JobStatus) -> StoreResult<Job> {
        let job = self.fetch_job(id).await?;
        if !job.status.can_transition_to(final_status) {
            return Err(StorageError::InvalidTransition {
                from: job.status,
                to: final_status,
            });
        }

        let now = Utc::now();
        sqlx::query("UPDATE jobs SET status = ?1, completed_at = ?2, updated_at = ?2 WHERE id = ?3")
            .bind(final_status.to_string())
            .bind(now.to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        self.fetch_job(id).await
    }

    async fn add_job_error(&self, id: Uuid, message: &str) -> StoreResult<Job> {
        let job = self.fetch_job(id).await?;
        let details = match job.error_details {
            Some(existing) => format!("{}\n{}", existing, message),
            None => message.to_string(),
        };

        sqlx::query(
            "UPDATE jobs SET errors_count = errors_count + 1,
                             error_details = ?1, updated_at = ?2
             WHERE id = ?3",
        )
        .bind(&details)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE sites SET errors_count = errors_count + 1 WHERE id = ?1")
            .bind(job.site_id.to_string())
            .execute(&self.pool)
            .await?;

        self.fetch_job(id).await
    }

    async fn get_crawling_stats(&self) -> StoreResult<CrawlingStats> {
        let total_sites: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sites")
            .fetch_one(&self.pool)
            .await?;
        let total_pages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages")
            .fetch_one(&self.pool)
            .await?;
        let total_jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        let running_jobs: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'running'")
                .fetch_one(&self.pool)
                .await?;
        let failed_jobs: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'failed'")
                .fetch_one(&self.pool)
                .await?;

        Ok(CrawlingStats {
            total_sites: total_sites as u64,
            total_pages: total_pages as u64,
            total_jobs: total_jobs as u64,
            running_jobs: running_jobs as u64,
            failed_jobs: failed_jobs as u64,
        })
    }

    async fn get_site_stats(&self, site_id: Uuid) -> StoreResult<SiteStats> {
        let site = self
            .fetch_site(site_id)
            .await?
            .ok_or(StorageError::SiteNotFound(site_id))?;
        let completed_jobs: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE site_id = ?1 AND status = 'completed'",
        )
        .bind(site_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(SiteStats {
            site_id,
            pages_count: site.pages_count,
            errors_count: site.errors_count,
            last_crawled_at: site.last_crawled_at,
            completed_jobs: completed_jobs as u64,
        })
    }

    async fn get_recent_activity(&self, limit: usize) -> StoreResult<Vec<ActivityEntry>> {
        let rows = sqlx::query(
            "SELECT url, site_id, title, status_code, crawled_at
             FROM pages ORDER BY crawled_at DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ActivityEntry {
                    url: row.try_get("url")?,
                    site_id: parse_id(&row.try_get::<String, _>("site_id")?)?,
                    title: row.try_get("title")?,
                    status_code: row
                        .try_get::<Option<i64>, _>("status_code")?
                        .map(|c| c as u16),
                    crawled_at: parse_ts(&row.try_get::<String, _>("crawled_at")?)?,
                })
            })
            .collect()
    }
}
