//! Trawler: a concurrent site crawling pipeline.
//!
//! Work items flow from a deduplicating URL queue through a demand-driven
//! producer into a pool of workers, each invoking the crawler implementation
//! bound to the item. Outcomes feed back into the queue (retry or terminal
//! state), a TTL-based URL registry, and a pluggable persistence store.

pub mod cli;
pub mod crawler;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod storage;
pub mod utils;

pub use crawler::{Crawler, CrawlerRegistry, FilterRules, SiteCrawler, WorkItem};
pub use error::{CrawlError, CrawlResult};
pub use fetch::{FetchedPage, Fetcher, HttpFetcher};
pub use pipeline::{CrawlPipeline, JobTracker, PipelineSettings};
pub use storage::{CrawlStore, MemoryStore, SqliteStore, UrlQueue, UrlRegistry, UrlStatus};
