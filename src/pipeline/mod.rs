pub mod producer;
pub mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::crawler::registry::CrawlerRegistry;
use crate::error::CrawlError;
use crate::storage::models::JobProgress;
use crate::storage::queue::UrlQueue;
use crate::storage::registry::UrlRegistry;
use crate::storage::store::SharedStore;
use crate::utils::metrics::MetricsCollector;
use worker::WorkerContext;

fn default_worker_count() -> usize {
    (2 * num_cpus::get()).min(8)
}

fn default_max_demand() -> usize {
    2
}

fn default_retry_ceiling() -> u32 {
    3
}

fn default_crawled_ttl_seconds() -> u64 {
    86_400
}

fn default_sweep_interval_ms() -> u64 {
    3_600_000
}

fn default_producer_poll_ms() -> u64 {
    1_000
}

/// Tunables recognized by the pipeline core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Number of parallel workers
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Per-worker in-flight ceiling; the producer channel holds at most
    /// `worker_count * max_demand` items
    #[serde(default = "default_max_demand")]
    pub max_demand: usize,

    /// Maximum re-admissions of a URL after retryable failures
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,

    /// Registry TTL for successfully crawled URLs
    #[serde(default = "default_crawled_ttl_seconds")]
    pub crawled_ttl_seconds: u64,

    /// Cadence of the registry expiration sweep
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Producer re-poll interval when the queue is empty
    #[serde(default = "default_producer_poll_ms")]
    pub producer_poll_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            max_demand: default_max_demand(),
            retry_ceiling: default_retry_ceiling(),
            crawled_ttl_seconds: default_crawled_ttl_seconds(),
            sweep_interval_ms: default_sweep_interval_ms(),
            producer_poll_ms: default_producer_poll_ms(),
        }
    }
}

/// Progress bookkeeping for the active crawl job.
///
/// Workers bump the in-process counters and flush absolute values to the
/// store; storage failures here are logged and swallowed so job accounting
/// never takes down item processing.
pub struct JobTracker {
    store: SharedStore,
    job_id: Uuid,
    pages_crawled: AtomicU64,
}

impl JobTracker {
    pub fn new(store: SharedStore, job_id: Uuid) -> Self {
        Self {
            store,
            job_id,
            pages_crawled: AtomicU64::new(0),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub async fn record_crawled(&self) {
        let crawled = self.pages_crawled.fetch_add(1, Ordering::SeqCst) + 1;
        let progress = JobProgress {
            pages_crawled: Some(crawled),
            ..JobProgress::default()
        };
        if let Err(e) = self.store.update_job_progress(self.job_id, progress).await {
            warn!("Failed to update job progress: {}", e);
        }
    }

    pub async fn record_error(&self, url: &str, err: &CrawlError) {
        let message = format!("{}: {}", url, err);
        if let Err(e) = self.store.add_job_error(self.job_id, &message).await {
            warn!("Failed to record job error: {}", e);
        }
    }

    pub async fn set_pages_found(&self, found: u64) {
        let progress = JobProgress {
            pages_found: Some(found),
            ..JobProgress::default()
        };
        if let Err(e) = self.store.update_job_progress(self.job_id, progress).await {
            warn!("Failed to update job progress: {}", e);
        }
    }
}

/// Supervisor wiring the queue, registry, producer, and worker pool.
///
/// All collaborators are injected at construction so tests can run isolated
/// pipelines side by side. Shutdown stops the producer, lets workers drain
/// the in-flight channel, and aborts the registry sweeper; items still
/// queued stay in the queue for the next start.
pub struct CrawlPipeline {
    queue: Arc<UrlQueue>,
    url_registry: Arc<UrlRegistry>,
    crawlers: Arc<CrawlerRegistry>,
    settings: PipelineSettings,
    metrics: MetricsCollector,
    job: Option<Arc<JobTracker>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl CrawlPipeline {
    pub fn new(
        queue: Arc<UrlQueue>,
        url_registry: Arc<UrlRegistry>,
        crawlers: Arc<CrawlerRegistry>,
        settings: PipelineSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            queue,
            url_registry,
            crawlers,
            settings,
            metrics: MetricsCollector::new(),
            job: None,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            handles: Vec::new(),
            sweeper: None,
        }
    }

    /// Attach a job tracker; workers will report progress and errors to it.
    pub fn with_job(mut self, tracker: Arc<JobTracker>) -> Self {
        self.job = Some(tracker);
        self
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    pub fn queue(&self) -> Arc<UrlQueue> {
        Arc::clone(&self.queue)
    }

    pub fn url_registry(&self) -> Arc<UrlRegistry> {
        Arc::clone(&self.url_registry)
    }

    /// True once a shutdown has been signalled, whether by
    /// [`shutdown`](Self::shutdown) or by a crawler's stop action.
    pub fn stop_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Spawn the producer, the worker pool, and the registry sweeper.
    pub fn start(&mut self) {
        let capacity = (self.settings.worker_count * self.settings.max_demand).max(1);
        let (tx, rx) = mpsc::channel(capacity);

        info!(
            "Starting pipeline: {} workers, demand {}, channel capacity {}",
            self.settings.worker_count, self.settings.max_demand, capacity
        );

        self.handles.push(tokio::spawn(producer::run(
            Arc::clone(&self.queue),
            tx,
            self.shutdown_rx.clone(),
            Duration::from_millis(self.settings.producer_poll_ms),
        )));

        let rx = Arc::new(Mutex::new(rx));
        let context = Arc::new(WorkerContext {
            queue: Arc::clone(&self.queue),
            url_registry: Arc::clone(&self.url_registry),
            crawlers: Arc::clone(&self.crawlers),
            crawled_ttl: chrono::Duration::seconds(self.settings.crawled_ttl_seconds as i64),
            job: self.job.clone(),
            metrics: self.metrics.clone(),
            shutdown: Arc::clone(&self.shutdown_tx),
        });

        for worker_id in 0..self.settings.worker_count {
            self.handles.push(tokio::spawn(worker::run(
                worker_id,
                Arc::clone(&rx),
                Arc::clone(&context),
            )));
        }

        self.sweeper = Some(
            Arc::clone(&self.url_registry)
                .spawn_sweeper(Duration::from_millis(self.settings.sweep_interval_ms)),
        );
    }

    /// Block until nothing is pending and nothing is in flight, or until a
    /// shutdown is signalled (e.g. by a crawler returning a stop action).
    pub async fn wait_until_idle(&self) {
        loop {
            if *self.shutdown_rx.borrow() {
                return;
            }
            if self.queue.is_idle().await {
                // Re-check after a beat: a worker may be between popping the
                // item and its queue bookkeeping.
                tokio::time::sleep(Duration::from_millis(50)).await;
                if self.queue.is_idle().await {
                    return;
                }
                continue;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Stop the producer, drain the workers, and cancel the sweep timer.
    pub async fn shutdown(&mut self) {
        if self.shutdown_tx.send(true).is_err() {
            warn!("Pipeline shutdown signalled with no live receivers");
        }

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Pipeline task failed during shutdown: {}", e);
            }
        }

        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        info!("Pipeline stopped");
    }
}
