use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Default TTL applied to successfully crawled URLs
pub fn default_crawled_ttl() -> Duration {
    Duration::hours(24)
}

/// Lifecycle status of a URL in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Processing,
    Crawled,
    Failed,
}

/// Deduplication record for a single URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub url: String,
    pub status: UrlStatus,

    /// Wall-clock time of the last status transition
    pub recorded_at: DateTime<Utc>,

    /// Absolute expiry; once reached the entry reads as absent. Only set on
    /// crawled entries.
    pub expires_at: Option<DateTime<Utc>>,

    /// Total transitions ever observed for this URL
    pub attempts: u32,

    /// Error message recorded on the last failure
    pub last_error: Option<String>,
}

impl RegistryEntry {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if now >= expiry)
    }
}

/// Per-status counts over the live (non-expired) entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub processing: usize,
    pub crawled: usize,
    pub failed: usize,
}

/// Global URL deduplication registry with time-based expiration.
///
/// At most one entry exists per URL. Crawled entries carry a TTL after which
/// they read as absent, making the URL eligible for re-crawling; processing
/// and failed entries never expire and are cleared explicitly. The expiry
/// check is part of every read, so correctness never depends on the sweep
/// timer firing.
pub struct UrlRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl UrlRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Create or replace the entry for a URL, carrying the attempt count
    /// forward. `expires_at` is set only when a TTL is supplied.
    pub async fn register(&self, url: &str, status: UrlStatus, ttl: Option<Duration>) {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        let attempts = entries.get(url).map(|e| e.attempts).unwrap_or(0) + 1;
        entries.insert(
            url.to_string(),
            RegistryEntry {
                url: url.to_string(),
                status,
                recorded_at: now,
                expires_at: ttl.map(|ttl| now + ttl),
                attempts,
                last_error: None,
            },
        );
        trace!("Registered {} as {:?} (attempt {})", url, status, attempts);
    }

    /// Record a successful crawl with the default 24 h TTL.
    pub async fn mark_crawled(&self, url: &str) {
        self.register(url, UrlStatus::Crawled, Some(default_crawled_ttl()))
            .await;
    }

    /// Record a successful crawl with an explicit TTL.
    pub async fn mark_crawled_with_ttl(&self, url: &str, ttl: Duration) {
        self.register(url, UrlStatus::Crawled, Some(ttl)).await;
    }

    /// Record a failure. Failed entries never expire; they are cleared
    /// explicitly or replaced by a later transition.
    pub async fn mark_failed(&self, url: &str, error: Option<String>) {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        let attempts = entries.get(url).map(|e| e.attempts).unwrap_or(0) + 1;
        entries.insert(
            url.to_string(),
            RegistryEntry {
                url: url.to_string(),
                status: UrlStatus::Failed,
                recorded_at: now,
                expires_at: None,
                attempts,
                last_error: error,
            },
        );
    }

    /// Transition a processing entry to crawled without a TTL, making it
    /// permanent. No-op for any other current status.
    pub async fn unregister_processing(&self, url: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(url) {
            if entry.status == UrlStatus::Processing {
                entry.status = UrlStatus::Crawled;
                entry.recorded_at = Utc::now();
                entry.expires_at = None;
            }
        }
    }

    /// True iff a live entry exists: present and, when it carries an expiry,
    /// strictly before it. An entry read at exactly its expiry is absent.
    pub async fn is_registered(&self, url: &str) -> bool {
        let entries = self.entries.lock().await;
        match entries.get(url) {
            Some(entry) => !entry.is_expired_at(Utc::now()),
            None => false,
        }
    }

    /// Status of a live entry, if any.
    pub async fn status_of(&self, url: &str) -> Option<UrlStatus> {
        let entries = self.entries.lock().await;
        entries
            .get(url)
            .filter(|e| !e.is_expired_at(Utc::now()))
            .map(|e| e.status)
    }

    /// The live entry for a URL, if any.
    pub async fn entry(&self, url: &str) -> Option<RegistryEntry> {
        let entries = self.entries.lock().await;
        entries
            .get(url)
            .filter(|e| !e.is_expired_at(Utc::now()))
            .cloned()
    }

    /// Live entries with the given status, up to `limit`.
    pub async fn list_by_status(&self, status: UrlStatus, limit: usize) -> Vec<RegistryEntry> {
        let entries = self.entries.lock().await;
        let now = Utc::now();
        entries
            .values()
            .filter(|e| e.status == status && !e.is_expired_at(now))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> RegistryStats {
        let entries = self.entries.lock().await;
        let now = Utc::now();
        let mut stats = RegistryStats {
            total: 0,
            processing: 0,
            crawled: 0,
            failed: 0,
        };
        for entry in entries.values() {
            if entry.is_expired_at(now) {
                continue;
            }
            stats.total += 1;
            match entry.status {
                UrlStatus::Processing => stats.processing += 1,
                UrlStatus::Crawled => stats.crawled += 1,
                UrlStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Number of stored entries, expired ones included.
    pub async fn size(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Reclaim memory held by expired entries. Returns the count removed.
    /// Reads already treat expired entries as absent; this sweep only frees
    /// the map slots.
    pub async fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }

    /// Spawn the recurring expiration sweep. The caller owns the handle and
    /// aborts it on shutdown.
    pub fn spawn_sweeper(self: Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.cleanup_expired().await;
                if removed > 0 {
                    debug!("Registry sweep reclaimed {} expired entries", removed);
                }
            }
        })
    }
}

impl Default for UrlRegistry {
    fn default() -> Self {
        Self::new()
    }
}
