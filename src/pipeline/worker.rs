use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

use crate::crawler::contract::{Crawler, ErrorAction};
use crate::crawler::registry::CrawlerRegistry;
use crate::crawler::task::WorkItem;
use crate::error::{CrawlError, CrawlResult};
use crate::pipeline::JobTracker;
use crate::storage::queue::UrlQueue;
use crate::storage::registry::{UrlRegistry, UrlStatus};
use crate::utils::metrics::MetricsCollector;

/// Shared dependencies handed to every worker
pub struct WorkerContext {
    pub queue: Arc<UrlQueue>,
    pub url_registry: Arc<UrlRegistry>,
    pub crawlers: Arc<CrawlerRegistry>,
    pub crawled_ttl: chrono::Duration,
    pub job: Option<Arc<JobTracker>>,
    pub metrics: MetricsCollector,
    pub shutdown: Arc<watch::Sender<bool>>,
}

/// Worker loop: pull items from the shared channel until it closes.
///
/// Per-item failures are fully absorbed here; nothing propagates to the
/// producer or the supervisor.
pub async fn run(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    ctx: Arc<WorkerContext>,
) {
    debug!("Worker {} started", worker_id);
    loop {
        let item = { rx.lock().await.recv().await };
        let Some(item) = item else {
            break;
        };
        process_item(&ctx, item).await;
    }
    debug!("Worker {} stopped", worker_id);
}

async fn process_item(ctx: &WorkerContext, item: WorkItem) {
    let url = item.url.clone();
    ctx.url_registry
        .register(&url, UrlStatus::Processing, None)
        .await;

    let started = Instant::now();
    let outcome = invoke_crawler(ctx, &item).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(()) => {
            ctx.queue.mark_processed(&url).await;
            ctx.url_registry
                .mark_crawled_with_ttl(&url, ctx.crawled_ttl)
                .await;
            if let Some(job) = &ctx.job {
                job.record_crawled().await;
            }
            ctx.metrics.record_request(true, elapsed_ms, None).await;
            debug!("Processed {} in {}ms (attempt {})", url, elapsed_ms, item.retries);
        }
        Err(err) => {
            let action = match ctx.crawlers.get(&item.crawler_id) {
                Some(crawler) => crawler.handle_error(&url, &err),
                // The crawler vanished mid-item; fall back to the classifier.
                None if err.is_retryable() => ErrorAction::Retry,
                None => ErrorAction::Skip,
            };
            let retry = action == ErrorAction::Retry;

            ctx.queue.mark_failed(&url, retry).await;
            ctx.url_registry
                .mark_failed(&url, Some(err.to_string()))
                .await;
            if let Some(job) = &ctx.job {
                job.record_error(&url, &err).await;
            }

            let status_code = match &err {
                CrawlError::Http(status) => Some(*status),
                _ => None,
            };
            ctx.metrics
                .record_request(false, elapsed_ms, status_code)
                .await;

            warn!(
                "Crawl failed for {} (attempt {}): {} [retry: {}]",
                url, item.retries, err, retry
            );
            if action == ErrorAction::Stop {
                warn!("Crawler requested pipeline stop after failure on {}", url);
                let _ = ctx.shutdown.send(true);
            }
        }
    }
}

/// Resolve the item's crawler and invoke it inside its own task, so an
/// abnormal termination is captured and surfaced as an error value instead
/// of taking the worker down.
async fn invoke_crawler(ctx: &WorkerContext, item: &WorkItem) -> CrawlResult<()> {
    let Some(crawler) = ctx.crawlers.get(&item.crawler_id) else {
        return Err(CrawlError::InvalidCrawler(item.crawler_id.clone()));
    };

    let url = item.url.clone();
    let handle = tokio::spawn(async move { crawler.crawl(&url).await });
    match handle.await {
        Ok(result) => result,
        Err(join_err) => {
            if join_err.is_panic() {
                let payload = join_err.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(CrawlError::Panic(message))
            } else {
                Err(CrawlError::Panic("crawl task was cancelled".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::crawler::contract::ExtractedContent;
    use crate::fetch::FetchedPage;

    /// Crawler whose outcomes are scripted per attempt
    struct ScriptedCrawler {
        id: String,
        attempts: AtomicUsize,
        script: Vec<CrawlResult<()>>,
    }

    impl ScriptedCrawler {
        fn new(id: &str, script: Vec<CrawlResult<()>>) -> Self {
            Self {
                id: id.to_string(),
                attempts: AtomicUsize::new(0),
                script,
            }
        }
    }

    #[async_trait]
    impl Crawler for ScriptedCrawler {
        fn id(&self) -> &str {
            &self.id
        }

        async fn init(&self) -> CrawlResult<()> {
            Ok(())
        }

        async fn crawl(&self, _url: &str) -> CrawlResult<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            self.script
                .get(attempt)
                .cloned()
                .unwrap_or(Err(CrawlError::Panic("script exhausted".into())))
        }

        fn extract_links(&self, _page: &FetchedPage) -> HashSet<String> {
            HashSet::new()
        }

        fn extract_content(&self, _page: &FetchedPage, _url: &str) -> ExtractedContent {
            ExtractedContent {
                title: None,
                content: None,
                metadata: serde_json::json!({}),
                content_type: None,
                status_code: None,
                content_size: None,
            }
        }

        fn should_crawl_url(&self, _url: &str) -> bool {
            true
        }

        fn config(&self) -> serde_json::Value {
            serde_json::json!({})
        }
    }

    struct PanickingCrawler;

    #[async_trait]
    impl Crawler for PanickingCrawler {
        fn id(&self) -> &str {
            "panics"
        }

        async fn init(&self) -> CrawlResult<()> {
            Ok(())
        }

        async fn crawl(&self, _url: &str) -> CrawlResult<()> {
            panic!("exploded mid-crawl");
        }

        fn extract_links(&self, _page: &FetchedPage) -> HashSet<String> {
            HashSet::new()
        }

        fn extract_content(&self, _page: &FetchedPage, _url: &str) -> ExtractedContent {
            ExtractedContent {
                title: None,
                content: None,
                metadata: serde_json::json!({}),
                content_type: None,
                status_code: None,
                content_size: None,
            }
        }

        fn should_crawl_url(&self, _url: &str) -> bool {
            true
        }

        fn config(&self) -> serde_json::Value {
            serde_json::json!({})
        }
    }

    fn context(crawlers: Arc<CrawlerRegistry>) -> WorkerContext {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        WorkerContext {
            queue: Arc::new(UrlQueue::default()),
            url_registry: Arc::new(UrlRegistry::new()),
            crawlers,
            crawled_ttl: chrono::Duration::hours(24),
            job: None,
            metrics: MetricsCollector::new(),
            shutdown: Arc::new(shutdown_tx),
        }
    }

    async fn pop_and_process(ctx: &WorkerContext, url: &str) {
        let item = ctx.queue.pop().await.expect("item pending");
        assert_eq!(item.url, url);
        process_item(ctx, item).await;
    }

    #[tokio::test]
    async fn success_updates_queue_and_registry() {
        let crawlers = Arc::new(CrawlerRegistry::new());
        crawlers.register(Arc::new(ScriptedCrawler::new("s", vec![Ok(())])));
        let ctx = context(crawlers);

        ctx.queue.push(WorkItem::new("https://a.test", "s")).await;
        pop_and_process(&ctx, "https://a.test").await;

        let stats = ctx.queue.stats().await;
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 0);
        assert!(ctx.url_registry.is_registered("https://a.test").await);
        assert_eq!(
            ctx.url_registry.status_of("https://a.test").await,
            Some(UrlStatus::Crawled)
        );
    }

    #[tokio::test]
    async fn missing_crawler_fails_permanently() {
        let ctx = context(Arc::new(CrawlerRegistry::new()));
        ctx.queue.push(WorkItem::new("https://a.test", "ghost")).await;
        pop_and_process(&ctx, "https://a.test").await;

        let stats = ctx.queue.stats().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.queued, 0);

        let entry = ctx.url_registry.entry("https://a.test").await.unwrap();
        assert_eq!(entry.status, UrlStatus::Failed);
        assert!(entry
            .last_error
            .as_deref()
            .unwrap()
            .contains("No crawler registered"));
    }

    #[tokio::test]
    async fn retryable_failure_re_admits_the_url() {
        let crawlers = Arc::new(CrawlerRegistry::new());
        crawlers.register(Arc::new(ScriptedCrawler::new(
            "s",
            vec![Err(CrawlError::Timeout("fetch".into())), Ok(())],
        )));
        let ctx = context(crawlers);

        ctx.queue.push(WorkItem::new("https://a.test", "s")).await;
        pop_and_process(&ctx, "https://a.test").await;

        // Failure re-admitted the URL with a bumped attempt count.
        let retried = ctx.queue.pop().await.unwrap();
        assert_eq!(retried.retries, 1);
        process_item(&ctx, retried).await;

        let stats = ctx.queue.stats().await;
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(
            ctx.url_registry.status_of("https://a.test").await,
            Some(UrlStatus::Crawled)
        );
    }

    #[tokio::test]
    async fn permanent_failure_is_not_re_admitted() {
        let crawlers = Arc::new(CrawlerRegistry::new());
        crawlers.register(Arc::new(ScriptedCrawler::new(
            "s",
            vec![Err(CrawlError::Http(404))],
        )));
        let ctx = context(crawlers);

        ctx.queue.push(WorkItem::new("https://a.test", "s")).await;
        pop_and_process(&ctx, "https://a.test").await;

        assert_eq!(ctx.queue.size().await, 0);
        let stats = ctx.queue.stats().await;
        assert_eq!(stats.failed, 1);
        let entry = ctx.url_registry.entry("https://a.test").await.unwrap();
        assert_eq!(entry.last_error.as_deref(), Some("HTTP error: status 404"));
    }

    #[tokio::test]
    async fn panic_is_captured_as_a_permanent_failure() {
        let crawlers = Arc::new(CrawlerRegistry::new());
        crawlers.register(Arc::new(PanickingCrawler));
        let ctx = context(crawlers);

        ctx.queue.push(WorkItem::new("https://a.test", "panics")).await;
        pop_and_process(&ctx, "https://a.test").await;

        // The panic became an error value; nothing was re-admitted.
        assert_eq!(ctx.queue.size().await, 0);
        let entry = ctx.url_registry.entry("https://a.test").await.unwrap();
        assert_eq!(entry.status, UrlStatus::Failed);
        assert!(entry.last_error.as_deref().unwrap().contains("exploded"));
    }
}
