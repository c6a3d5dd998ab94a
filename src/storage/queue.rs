use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::crawler::task::WorkItem;

/// Default ceiling on re-admissions after a retryable failure
pub const DEFAULT_RETRY_CEILING: u32 = 3;

/// Counters exposed by [`UrlQueue::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Items currently pending in the queue
    pub queued: usize,

    /// URLs popped but not yet terminally handled
    pub processing: usize,

    /// URLs that completed successfully
    pub processed: u64,

    /// Failure count, including failures that led to a retry
    pub failed: u64,
}

/// Pending entry ordered by priority (descending), then admission order
struct PendingEntry {
    item: WorkItem,
    seq: u64,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.item.priority == other.item.priority && self.seq == other.seq
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, earlier admission breaks ties.
        self.item
            .priority
            .cmp(&other.item.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    pending: BinaryHeap<PendingEntry>,
    pending_urls: HashSet<String>,
    /// In-flight items keyed by URL; the retained item is the source of
    /// truth when a retry is synthesized.
    in_flight: HashMap<String, WorkItem>,
    processed: HashSet<String>,
    processed_count: u64,
    failed_count: u64,
    next_seq: u64,
}

impl QueueState {
    fn admit(&mut self, item: WorkItem) -> bool {
        if self.pending_urls.contains(&item.url)
            || self.in_flight.contains_key(&item.url)
            || self.processed.contains(&item.url)
        {
            debug!("Dropping duplicate work item: {}", item.url);
            return false;
        }

        self.pending_urls.insert(item.url.clone());
        self.pending.push(PendingEntry {
            item,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        true
    }
}

/// FIFO-with-priority queue of pending work items.
///
/// Tracks the in-flight and processed URL sets so the same URL never exists
/// twice across the pending, processing, and processed positions. All
/// operations serialize on a single lock; callers observe a linearizable
/// view. The queue is unbounded; backpressure is the producer's concern.
pub struct UrlQueue {
    state: Mutex<QueueState>,
    retry_ceiling: u32,
}

impl UrlQueue {
    pub fn new(retry_ceiling: u32) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: BinaryHeap::new(),
                pending_urls: HashSet::new(),
                in_flight: HashMap::new(),
                processed: HashSet::new(),
                processed_count: 0,
                failed_count: 0,
                next_seq: 0,
            }),
            retry_ceiling,
        }
    }

    /// Admit a work item unless its URL is already pending, in flight, or
    /// processed. Returns whether the item was admitted.
    pub async fn push(&self, item: WorkItem) -> bool {
        let mut state = self.state.lock().await;
        let admitted = state.admit(item);
        if admitted {
            debug!("Queued work item ({} pending)", state.pending.len());
        }
        admitted
    }

    /// Bulk form of [`push`](Self::push); all items are admitted under one
    /// lock acquisition. Returns the count admitted.
    pub async fn push_batch(&self, items: Vec<WorkItem>) -> usize {
        let mut state = self.state.lock().await;
        let mut admitted = 0;
        for item in items {
            if state.admit(item) {
                admitted += 1;
            }
        }
        admitted
    }

    /// Remove the highest-priority, earliest-admitted pending item and move
    /// its URL into the in-flight set. Returns `None` when nothing is
    /// pending; never blocks.
    pub async fn pop(&self) -> Option<WorkItem> {
        let mut state = self.state.lock().await;
        let entry = state.pending.pop()?;
        state.pending_urls.remove(&entry.item.url);
        state
            .in_flight
            .insert(entry.item.url.clone(), entry.item.clone());
        Some(entry.item)
    }

    /// Move a URL from in-flight to processed.
    pub async fn mark_processed(&self, url: &str) {
        let mut state = self.state.lock().await;
        if state.in_flight.remove(url).is_some() {
            state.processed.insert(url.to_string());
            state.processed_count += 1;
        } else {
            debug!("mark_processed for URL not in flight: {}", url);
        }
    }

    /// Remove a URL from in-flight after a failure. When `retry` is set, a
    /// successor item is synthesized from the original (same crawler binding
    /// and priority, attempt count incremented) and re-admitted, unless that
    /// would exceed the retry ceiling.
    pub async fn mark_failed(&self, url: &str, retry: bool) {
        let mut state = self.state.lock().await;
        let Some(item) = state.in_flight.remove(url) else {
            debug!("mark_failed for URL not in flight: {}", url);
            return;
        };
        state.failed_count += 1;

        if retry {
            let next = item.retry();
            if next.retries <= self.retry_ceiling {
                debug!("Re-admitting {} (attempt {})", url, next.retries);
                state.admit(next);
            } else {
                warn!(
                    "Retry ceiling ({}) reached for {}, failing terminally",
                    self.retry_ceiling, url
                );
            }
        }
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            queued: state.pending.len(),
            processing: state.in_flight.len(),
            processed: state.processed_count,
            failed: state.failed_count,
        }
    }

    /// Number of pending items.
    pub async fn size(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// True when the URL is currently in flight or already processed.
    pub async fn is_processed_or_processing(&self, url: &str) -> bool {
        let state = self.state.lock().await;
        state.in_flight.contains_key(url) || state.processed.contains(url)
    }

    /// True when nothing is pending and nothing is in flight.
    pub async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;
        state.pending.is_empty() && state.in_flight.is_empty()
    }

    /// URLs currently in flight.
    pub async fn processing_urls(&self) -> Vec<String> {
        self.state.lock().await.in_flight.keys().cloned().collect()
    }

    /// Drop all queue state, including counters.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.pending.clear();
        state.pending_urls.clear();
        state.in_flight.clear();
        state.processed.clear();
        state.processed_count = 0;
        state.failed_count = 0;
    }
}

impl Default for UrlQueue {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_CEILING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(url: &str) -> WorkItem {
        WorkItem::new(url, "test")
    }

    #[tokio::test]
    async fn push_then_pop_returns_the_item() {
        let queue = UrlQueue::default();
        assert!(queue.push(item("https://a.test")).await);

        let popped = queue.pop().await.unwrap();
        assert_eq!(popped.url, "https://a.test");
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn duplicate_pending_url_is_dropped() {
        let queue = UrlQueue::default();
        assert!(queue.push(item("https://a.test")).await);
        assert!(!queue.push(item("https://a.test")).await);

        assert_eq!(queue.size().await, 1);
        assert_eq!(queue.stats().await.queued, 1);
    }

    #[tokio::test]
    async fn in_flight_and_processed_urls_are_rejected() {
        let queue = UrlQueue::default();
        queue.push(item("https://a.test")).await;
        queue.pop().await.unwrap();

        // In flight now.
        assert!(!queue.push(item("https://a.test")).await);

        queue.mark_processed("https://a.test").await;
        assert!(!queue.push(item("https://a.test")).await);
    }

    #[tokio::test]
    async fn higher_priority_pops_first_with_fifo_ties() {
        let queue = UrlQueue::default();
        queue.push(WorkItem::new("https://a.test/1", "t")).await;
        queue
            .push(WorkItem::with_priority("https://a.test/2", "t", 10))
            .await;
        queue.push(WorkItem::new("https://a.test/3", "t")).await;

        assert_eq!(queue.pop().await.unwrap().url, "https://a.test/2");
        assert_eq!(queue.pop().await.unwrap().url, "https://a.test/1");
        assert_eq!(queue.pop().await.unwrap().url, "https://a.test/3");
    }

    #[tokio::test]
    async fn counters_track_the_sets() {
        let queue = UrlQueue::default();
        queue.push(item("https://a.test/1")).await;
        queue.push(item("https://a.test/2")).await;

        let stats = queue.stats().await;
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.processing, 0);

        queue.pop().await.unwrap();
        let stats = queue.stats().await;
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.processing, 1);

        queue.mark_processed("https://a.test/1").await;
        let stats = queue.stats().await;
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn failed_without_retry_leaves_url_terminal() {
        let queue = UrlQueue::default();
        queue.push(item("https://a.test")).await;
        queue.pop().await.unwrap();
        queue.mark_failed("https://a.test", false).await;

        let stats = queue.stats().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn retry_re_admits_with_incremented_count() {
        let queue = UrlQueue::default();
        queue.push(item("https://a.test")).await;

        let first = queue.pop().await.unwrap();
        assert_eq!(first.retries, 0);
        queue.mark_failed("https://a.test", true).await;

        let second = queue.pop().await.unwrap();
        assert_eq!(second.retries, 1);
        assert_eq!(second.crawler_id, "test");
    }

    #[tokio::test]
    async fn retry_ceiling_caps_re_admission() {
        let queue = UrlQueue::new(3);
        queue.push(item("https://a.test")).await;

        // Attempts 0 through 3 run; the fourth failure is not re-admitted.
        let mut attempts = Vec::new();
        while let Some(work) = queue.pop().await {
            attempts.push(work.retries);
            queue.mark_failed(&work.url, true).await;
        }

        assert_eq!(attempts, vec![0, 1, 2, 3]);
        let stats = queue.stats().await;
        assert_eq!(stats.failed, 4);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn push_batch_reports_admitted_count() {
        let queue = UrlQueue::default();
        queue.push(item("https://a.test/1")).await;

        let admitted = queue
            .push_batch(vec![
                item("https://a.test/1"),
                item("https://a.test/2"),
                item("https://a.test/2"),
                item("https://a.test/3"),
            ])
            .await;

        assert_eq!(admitted, 2);
        assert_eq!(queue.size().await, 3);
    }

    #[tokio::test]
    async fn clear_resets_everything() {
        let queue = UrlQueue::default();
        queue.push(item("https://a.test/1")).await;
        queue.push(item("https://a.test/2")).await;
        queue.pop().await.unwrap();
        queue.clear().await;

        let stats = queue.stats().await;
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.processing, 0);
        assert!(queue.is_idle().await);
    }
}
