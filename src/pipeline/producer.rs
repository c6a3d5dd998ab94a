use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

use crate::crawler::task::WorkItem;
use crate::storage::queue::UrlQueue;

/// Demand-driven producer task: the sole dequeuer of the URL queue.
///
/// Worker demand is the free capacity of the bounded channel; a send
/// completes only when a worker slot opens, so the producer never pops more
/// work than the pool can absorb. On an empty queue it arms the poll timer
/// once and re-attempts when it fires. A shutdown signal stops emission;
/// dropping the sender then drains and releases the workers.
pub async fn run(
    queue: Arc<UrlQueue>,
    tx: mpsc::Sender<WorkItem>,
    mut shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    info!("Producer started (poll interval {:?})", poll_interval);
    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.pop().await {
            Some(item) => {
                trace!("Producer dispatching {}", item.url);
                if tx.send(item).await.is_err() {
                    // All workers are gone; nothing left to feed.
                    debug!("Producer channel closed, stopping");
                    break;
                }
            }
            None => {
                trace!("Queue empty, arming poll timer");
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
    info!("Producer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_items_in_queue_order() {
        let queue = Arc::new(UrlQueue::default());
        queue.push(WorkItem::new("https://a.test/1", "t")).await;
        queue
            .push(WorkItem::with_priority("https://a.test/2", "t", 9))
            .await;

        let (tx, mut rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            Arc::clone(&queue),
            tx,
            shutdown_rx,
            Duration::from_millis(10),
        ));

        assert_eq!(rx.recv().await.unwrap().url, "https://a.test/2");
        assert_eq!(rx.recv().await.unwrap().url, "https://a.test/1");

        // Dropping the receiver ends the producer on its next send; signal
        // shutdown instead so it exits from the empty-queue branch.
        drop(rx);
        _shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_emission() {
        let queue = Arc::new(UrlQueue::default());
        let (tx, mut rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            Arc::clone(&queue),
            tx,
            shutdown_rx,
            Duration::from_secs(60),
        ));

        // Producer is parked on its poll timer; the signal must wake it.
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
