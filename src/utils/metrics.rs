use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

/// In-process crawl metrics collector
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    metrics: Arc<Mutex<Metrics>>,
}

/// Metrics data structure
#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// Total crawl attempts
    pub total_requests: usize,

    /// Successful crawls
    pub successful_requests: usize,

    /// Failed crawls, retried ones included
    pub failed_requests: usize,

    /// Cumulative processing time across attempts, in milliseconds
    pub total_duration_ms: u64,

    /// HTTP status code counts for failures that carried one
    pub status_codes: HashMap<u16, usize>,

    /// Current requests per second since collection started
    pub current_rps: f64,

    /// Peak requests per second observed
    pub peak_rps: f64,
}

impl Metrics {
    fn new() -> Self {
        Self {
            start_time: Utc::now(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            total_duration_ms: 0,
            status_codes: HashMap::new(),
            current_rps: 0.0,
            peak_rps: 0.0,
        }
    }

    /// Mean processing time per attempt, in milliseconds
    pub fn average_duration_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.total_requests as f64
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(Mutex::new(Metrics::new())),
        }
    }

    /// Record one crawl attempt
    pub async fn record_request(&self, success: bool, duration_ms: u64, status_code: Option<u16>) {
        let mut metrics = self.metrics.lock().await;

        metrics.total_requests += 1;
        if success {
            metrics.successful_requests += 1;
        } else {
            metrics.failed_requests += 1;
        }
        metrics.total_duration_ms += duration_ms;

        if let Some(code) = status_code {
            *metrics.status_codes.entry(code).or_default() += 1;
        }

        let elapsed_seconds = (Utc::now() - metrics.start_time).num_seconds().max(1) as f64;
        metrics.current_rps = metrics.total_requests as f64 / elapsed_seconds;
        metrics.peak_rps = metrics.peak_rps.max(metrics.current_rps);
    }

    /// Get a snapshot of all metrics
    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }

    /// Reset metrics
    pub async fn reset(&self) {
        let mut metrics = self.metrics.lock().await;
        *metrics = Metrics::new();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
