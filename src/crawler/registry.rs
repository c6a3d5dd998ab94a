use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::crawler::contract::Crawler;

/// Process-wide mapping from crawler id to implementation.
///
/// Populated at startup; pipeline workers resolve work items against it and
/// fail the item with an invalid-crawler error when the lookup misses.
#[derive(Default)]
pub struct CrawlerRegistry {
    crawlers: RwLock<HashMap<String, Arc<dyn Crawler>>>,
}

impl CrawlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation under its own id, replacing any previous
    /// binding.
    pub fn register(&self, crawler: Arc<dyn Crawler>) {
        let id = crawler.id().to_string();
        info!("Registering crawler '{}'", id);
        self.crawlers
            .write()
            .expect("crawler registry lock poisoned")
            .insert(id, crawler);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Crawler>> {
        self.crawlers
            .read()
            .expect("crawler registry lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.crawlers
            .read()
            .expect("crawler registry lock poisoned")
            .contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.crawlers
            .read()
            .expect("crawler registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}
