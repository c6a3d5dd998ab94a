use tracing::debug;

use crate::crawler::contract::Crawler;
use crate::crawler::filter::normalize_url;
use crate::crawler::task::WorkItem;
use crate::storage::queue::UrlQueue;
use crate::storage::registry::UrlRegistry;

/// Admit discovered links into the queue on behalf of a crawler.
///
/// Each link is normalized, passed through the crawler's admission filter,
/// and checked against the URL registry and the queue's processed set. A URL
/// another worker registered a moment ago can still slip past the registry
/// check; queue admission deduplicates it as the second line of defense, so
/// the worst case is one redundant enqueue attempt dropped there.
///
/// Returns the number of items actually admitted.
pub async fn enqueue_discovered_links(
    links: impl IntoIterator<Item = String>,
    crawler: &dyn Crawler,
    queue: &UrlQueue,
    registry: &UrlRegistry,
) -> usize {
    let mut batch = Vec::new();
    for link in links {
        let normalized = normalize_url(&link);
        if !crawler.should_crawl_url(&normalized) {
            continue;
        }
        if registry.is_registered(&normalized).await {
            debug!("Skipping already-registered URL: {}", normalized);
            continue;
        }
        if queue.is_processed_or_processing(&normalized).await {
            continue;
        }
        batch.push(WorkItem::new(normalized, crawler.id()));
    }

    if batch.is_empty() {
        return 0;
    }
    queue.push_batch(batch).await
}
