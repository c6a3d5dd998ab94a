use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::cli::config::{CrawlerConfig, DEFAULT_PROFILE};
use crate::crawler::filter::normalize_url;
use crate::crawler::registry::CrawlerRegistry;
use crate::crawler::site::SiteCrawler;
use crate::crawler::Crawler;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::pipeline::{CrawlPipeline, JobTracker};
use crate::storage::models::{JobStatus, NewSite, SearchParams};
use crate::storage::queue::UrlQueue;
use crate::storage::registry::UrlRegistry;
use crate::storage::store::StoreFactory;

/// Crawl a site end to end: create or reuse its record, run the pipeline
/// until the frontier drains, and finalize the job.
pub async fn crawl(url: String, profile: String, workers: Option<usize>) -> Result<()> {
    let mut config = CrawlerConfig::load(&profile)
        .context(format!("Failed to load profile: {}", profile))?;
    if let Some(w) = workers {
        config.pipeline.worker_count = w;
    }

    let base_url = normalize_url(&url);
    let parsed = Url::parse(&base_url).context(format!("Invalid base URL: {}", url))?;
    let host = parsed
        .host_str()
        .context(format!("Base URL has no host: {}", url))?
        .to_string();

    let store = StoreFactory::create(&config.storage)
        .await
        .context("Failed to open the store")?;

    let site = match store.get_site_by_url(&base_url).await? {
        Some(site) => site,
        None => {
            store
                .create_site(NewSite {
                    name: host.clone(),
                    base_url: base_url.clone(),
                    crawler_id: config.site.crawler_id.clone(),
                    config: serde_json::to_value(&config.site.rules)?,
                })
                .await?
        }
    };

    // An unscoped profile crawls only the target site's own domain.
    let mut rules = config.site.rules.clone();
    if rules.allowed_domains.is_empty() {
        rules.allowed_domains.push(host);
    }

    let queue = Arc::new(UrlQueue::new(config.pipeline.retry_ceiling));
    let url_registry = Arc::new(UrlRegistry::new());
    let crawlers = Arc::new(CrawlerRegistry::new());
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(
        config.fetch.timeout_secs,
        &config.fetch.user_agent,
    ));

    let crawler = Arc::new(SiteCrawler::new(
        site.crawler_id.clone(),
        site.id,
        vec![base_url.clone()],
        rules,
        fetcher,
        store.clone(),
        Arc::clone(&queue),
        Arc::clone(&url_registry),
    ));
    crawlers.register(crawler.clone());

    let job = store
        .create_job(site.id, serde_json::to_value(&config.pipeline)?)
        .await?;
    store.start_job(job.id).await?;
    let tracker = Arc::new(JobTracker::new(store.clone(), job.id));

    let mut pipeline = CrawlPipeline::new(
        Arc::clone(&queue),
        Arc::clone(&url_registry),
        crawlers,
        config.pipeline.clone(),
    )
    .with_job(Arc::clone(&tracker));
    let metrics = pipeline.metrics();
    pipeline.start();

    if let Err(e) = crawler.init().await {
        tracker.record_error(&base_url, &e).await;
        pipeline.shutdown().await;
        store.complete_job(job.id, JobStatus::Failed).await?;
        anyhow::bail!("Crawler initialization failed: {}", e);
    }

    info!("Crawl job {} started for {}", job.id, base_url);
    pipeline.wait_until_idle().await;

    let queue_stats = queue.stats().await;
    let registry_stats = url_registry.stats().await;
    tracker
        .set_pages_found(registry_stats.total as u64 + queue_stats.queued as u64)
        .await;

    let final_status = if pipeline.stop_requested() {
        JobStatus::Failed
    } else {
        JobStatus::Completed
    };
    pipeline.shutdown().await;
    let job = store.complete_job(job.id, final_status).await?;

    let snapshot = metrics.get_metrics().await;
    println!("Job ID: {}", job.id);
    println!("Status: {}", job.status);
    println!("Pages crawled: {}", job.pages_crawled);
    println!("Pages found: {}", job.pages_found);
    println!("Errors: {}", job.errors_count);
    println!(
        "Attempts: {} total, {:.1} req/s peak, {:.0}ms avg",
        snapshot.total_requests,
        snapshot.peak_rps,
        snapshot.average_duration_ms()
    );
    println!("Use `trawler status {}` to revisit this job", job.id);

    Ok(())
}

/// Check the status of a crawl job
pub async fn status(job_id: String) -> Result<()> {
    let config = CrawlerConfig::load(DEFAULT_PROFILE)?;
    let store = StoreFactory::create(&config.storage).await?;

    let id = Uuid::parse_str(&job_id).context(format!("Invalid job id: {}", job_id))?;
    let job = store
        .get_job(id)
        .await?
        .context(format!("Job not found: {}", job_id))?;

    println!("Job ID: {}", job.id);
    println!("Status: {}", job.status);
    println!("Pages crawled: {}", job.pages_crawled);
    println!("Pages found: {}", job.pages_found);
    println!("Errors: {}", job.errors_count);
    if let Some(started) = job.started_at {
        println!("Started: {}", started);
    }
    if let Some(completed) = job.completed_at {
        println!("Completed: {}", completed);
    }
    if let Some(details) = &job.error_details {
        println!("Recent errors:");
        for line in details.lines().rev().take(10) {
            println!("  - {}", line);
        }
    }

    Ok(())
}

/// Search crawled pages
pub async fn search(query: String, site: Option<String>, page: u32, per_page: u32) -> Result<()> {
    let config = CrawlerConfig::load(DEFAULT_PROFILE)?;
    let store = StoreFactory::create(&config.storage).await?;

    let site_id = match site {
        Some(base_url) => {
            let normalized = normalize_url(&base_url);
            let site = store
                .get_site_by_url(&normalized)
                .await?
                .context(format!("No site registered for {}", normalized))?;
            Some(site.id)
        }
        None => None,
    };

    let hits = store
        .search_pages(
            &query,
            SearchParams {
                site_id,
                page,
                per_page,
            },
        )
        .await?;

    if hits.is_empty() {
        println!("No pages matched '{}'", query);
        return Ok(());
    }

    println!("Matches for '{}' (page {}):", query, page);
    for hit in hits {
        match &hit.title {
            Some(title) => println!("  {} - {}", hit.url, title),
            None => println!("  {}", hit.url),
        }
    }

    Ok(())
}

/// List crawled pages for one site
pub async fn pages(site: String, page: u32, per_page: u32) -> Result<()> {
    let config = CrawlerConfig::load(DEFAULT_PROFILE)?;
    let store = StoreFactory::create(&config.storage).await?;

    let normalized = normalize_url(&site);
    let site = store
        .get_site_by_url(&normalized)
        .await?
        .context(format!("No site registered for {}", normalized))?;

    let pages = store.list_pages_for_site(site.id, page, per_page).await?;
    if pages.is_empty() {
        println!("No pages stored for {} (page {})", site.base_url, page);
        return Ok(());
    }

    println!("Pages for {} (page {}):", site.base_url, page);
    for entry in pages {
        match &entry.title {
            Some(title) => println!("  {} - {}", entry.url, title),
            None => println!("  {}", entry.url),
        }
    }

    Ok(())
}

/// Show store-wide statistics and recent activity
pub async fn stats() -> Result<()> {
    let config = CrawlerConfig::load(DEFAULT_PROFILE)?;
    let store = StoreFactory::create(&config.storage).await?;

    let stats = store.get_crawling_stats().await?;
    println!("Sites: {}", stats.total_sites);
    println!("Pages: {}", stats.total_pages);
    println!(
        "Jobs: {} total, {} running, {} failed",
        stats.total_jobs, stats.running_jobs, stats.failed_jobs
    );

    let sites = store.list_sites().await?;
    for site in sites {
        let site_stats = store.get_site_stats(site.id).await?;
        println!(
            "  {} - {} pages, {} errors, {} completed jobs",
            site.base_url,
            site_stats.pages_count,
            site_stats.errors_count,
            site_stats.completed_jobs
        );
    }

    let activity = store.get_recent_activity(10).await?;
    if !activity.is_empty() {
        println!("Recent activity:");
        for entry in activity {
            println!("  {} ({})", entry.url, entry.crawled_at);
        }
    }

    Ok(())
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = CrawlerConfig::list_profiles()?;

    if profiles.is_empty() {
        println!("No configuration profiles found");
        return Ok(());
    }

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Show or create a specific configuration profile
pub fn manage_profile(profile_name: String) -> Result<()> {
    match CrawlerConfig::load(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{:#?}", config);
        }
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = CrawlerConfig::default();
            config.save(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let config = CrawlerConfig::load(DEFAULT_PROFILE)?;
    println!("Current configuration:");
    println!("{:#?}", config);

    Ok(())
}
