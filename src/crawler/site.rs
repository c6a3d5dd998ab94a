use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::crawler::contract::{Crawler, ExtractedContent};
use crate::crawler::filter::{normalize_url, FilterRules, UrlFilter};
use crate::crawler::links::enqueue_discovered_links;
use crate::crawler::task::WorkItem;
use crate::error::{CrawlError, CrawlResult};
use crate::fetch::{FetchedPage, Fetcher};
use crate::storage::models::PageUpsert;
use crate::storage::queue::UrlQueue;
use crate::storage::registry::UrlRegistry;
use crate::storage::store::SharedStore;

/// Generic crawler for one configured site.
///
/// Seeds from the site's base URL, fetches through the injected fetcher,
/// persists extracted content, and feeds discovered links back through the
/// admission filter. Site-specific behavior comes entirely from the filter
/// rules; bespoke crawlers implement [`Crawler`] directly instead.
pub struct SiteCrawler {
    crawler_id: String,
    site_id: Uuid,
    seeds: Vec<String>,
    rules: FilterRules,
    filter: UrlFilter,
    fetcher: Arc<dyn Fetcher>,
    store: SharedStore,
    queue: Arc<UrlQueue>,
    registry: Arc<UrlRegistry>,
}

impl SiteCrawler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        crawler_id: impl Into<String>,
        site_id: Uuid,
        seeds: Vec<String>,
        rules: FilterRules,
        fetcher: Arc<dyn Fetcher>,
        store: SharedStore,
        queue: Arc<UrlQueue>,
        registry: Arc<UrlRegistry>,
    ) -> Self {
        let filter = UrlFilter::new(&rules);
        Self {
            crawler_id: crawler_id.into(),
            site_id,
            seeds,
            rules,
            filter,
            fetcher,
            store,
            queue,
            registry,
        }
    }
}

#[async_trait]
impl Crawler for SiteCrawler {
    fn id(&self) -> &str {
        &self.crawler_id
    }

    async fn init(&self) -> CrawlResult<()> {
        let items: Vec<WorkItem> = self
            .seeds
            .iter()
            .map(|seed| WorkItem::new(normalize_url(seed), &self.crawler_id))
            .collect();
        if items.is_empty() {
            return Err(CrawlError::Invalid(format!(
                "crawler '{}' has no seed URLs",
                self.crawler_id
            )));
        }

        let admitted = self.queue.push_batch(items).await;
        info!(
            "Crawler '{}' seeded {} URL(s) into the queue",
            self.crawler_id, admitted
        );
        Ok(())
    }

    async fn crawl(&self, url: &str) -> CrawlResult<()> {
        let page = self.fetcher.fetch(url).await?;

        let extracted = self.extract_content(&page, url);
        self.store
            .upsert_page(PageUpsert {
                site_id: self.site_id,
                url: url.to_string(),
                title: extracted.title,
                content: extracted.content,
                metadata: extracted.metadata,
                status_code: extracted.status_code,
                content_type: extracted.content_type,
                content_size: extracted.content_size,
            })
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;

        let links = self.extract_links(&page);
        let admitted =
            enqueue_discovered_links(links, self, &self.queue, &self.registry).await;
        debug!("Crawled {} and admitted {} new link(s)", url, admitted);
        Ok(())
    }

    fn extract_links(&self, page: &FetchedPage) -> HashSet<String> {
        page.links.iter().cloned().collect()
    }

    fn extract_content(&self, page: &FetchedPage, url: &str) -> ExtractedContent {
        let content = if page.text.is_empty() {
            None
        } else {
            Some(page.text.clone())
        };
        let content_size = content.as_ref().map(|c| c.len() as u64);

        ExtractedContent {
            title: page.title.clone(),
            content,
            metadata: json!({
                "fetched_url": page.url,
                "requested_url": url,
                "links_found": page.links.len(),
            }),
            content_type: page.content_type.clone(),
            status_code: Some(page.status_code),
            content_size,
        }
    }

    fn should_crawl_url(&self, url: &str) -> bool {
        self.filter.should_crawl(url)
    }

    fn config(&self) -> Value {
        json!({
            "crawler_id": self.crawler_id,
            "site_id": self.site_id,
            "seeds": self.seeds,
            "rules": self.rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use crate::storage::models::NewSite;

    /// Fetcher returning a fixed page regardless of URL
    struct FixedFetcher {
        page: FetchedPage,
    }

    #[async_trait]
    impl Fetcher for FixedFetcher {
        async fn fetch(&self, _url: &str) -> CrawlResult<FetchedPage> {
            Ok(self.page.clone())
        }
    }

    async fn harness(page: FetchedPage) -> (SiteCrawler, SharedStore, Arc<UrlQueue>) {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let site = store
            .create_site(NewSite {
                name: "Example".into(),
                base_url: "https://example.com".into(),
                crawler_id: "ex".into(),
                config: json!({}),
            })
            .await
            .unwrap();

        let queue = Arc::new(UrlQueue::default());
        let registry = Arc::new(UrlRegistry::new());
        let crawler = SiteCrawler::new(
            "ex",
            site.id,
            vec!["https://example.com".into()],
            FilterRules {
                allowed_domains: vec!["example.com".into()],
                include_patterns: vec![],
                exclude_patterns: vec![],
            },
            Arc::new(FixedFetcher { page }),
            store.clone(),
            queue.clone(),
            registry,
        );
        (crawler, store, queue)
    }

    fn example_page() -> FetchedPage {
        FetchedPage {
            url: "https://example.com/".into(),
            status_code: 200,
            content_type: Some("text/html".into()),
            title: Some("Example".into()),
            text: "Hello".into(),
            links: vec![
                "https://example.com/a".into(),
                "https://other.test/x".into(),
            ],
        }
    }

    #[tokio::test]
    async fn init_seeds_the_queue_idempotently() {
        let (crawler, _store, queue) = harness(example_page()).await;

        crawler.init().await.unwrap();
        assert_eq!(queue.size().await, 1);

        // Re-initializing does not duplicate the seed.
        crawler.init().await.unwrap();
        assert_eq!(queue.size().await, 1);
    }

    #[tokio::test]
    async fn crawl_persists_the_page_and_admits_filtered_links() {
        let (crawler, store, queue) = harness(example_page()).await;

        crawler.crawl("https://example.com/").await.unwrap();

        let page = store
            .get_page_by_url("https://example.com/")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.title.as_deref(), Some("Example"));
        assert_eq!(page.content.as_deref(), Some("Hello"));
        assert_eq!(page.content_size, Some(5));
        assert_eq!(
            page.content_hash.as_deref(),
            Some("185f8db32271fe25f561a6fc938b2e264306ec304eda518007d1764826381969")
        );

        // Only the allowed-domain link was admitted.
        assert_eq!(queue.size().await, 1);
        let item = queue.pop().await.unwrap();
        assert_eq!(item.url, "https://example.com/a");
        assert_eq!(item.crawler_id, "ex");
    }

    #[tokio::test]
    async fn admission_filter_applies_domain_rules() {
        let (crawler, _store, _queue) = harness(example_page()).await;
        assert!(crawler.should_crawl_url("https://example.com/a"));
        assert!(!crawler.should_crawl_url("https://other.test/x"));
    }
}
