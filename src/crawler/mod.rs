pub mod contract;
pub mod filter;
pub mod links;
pub mod registry;
pub mod site;
pub mod task;

pub use contract::{Crawler, ErrorAction, ExtractedContent};
pub use filter::{normalize_url, FilterRules, UrlFilter};
pub use registry::CrawlerRegistry;
pub use site::SiteCrawler;
pub use task::WorkItem;
