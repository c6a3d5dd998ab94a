use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;
use tracing::{debug, warn};

/// Admission rules for discovered URLs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterRules {
    /// Domains eligible for crawling; empty allows any domain. Subdomains of
    /// a listed domain are allowed.
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    /// Regex patterns a URL must match (when any are given)
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Regex patterns that reject a URL
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// URL admission filter for a single crawler.
///
/// Applies the scheme allow-list, domain allow-list, and include/exclude
/// pattern rules to normalized URLs. Deduplication is not this filter's
/// concern; the queue and registry own that.
pub struct UrlFilter {
    include_patterns: Vec<Regex>,
    exclude_patterns: Vec<Regex>,
    allowed_domains: HashSet<String>,
}

impl UrlFilter {
    pub fn new(rules: &FilterRules) -> Self {
        let include_patterns = rules
            .include_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!("Invalid include pattern '{}': {}", pattern, e);
                    None
                }
            })
            .collect();

        let exclude_patterns = rules
            .exclude_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!("Invalid exclude pattern '{}': {}", pattern, e);
                    None
                }
            })
            .collect();

        let allowed_domains = rules
            .allowed_domains
            .iter()
            .map(|domain| domain.to_lowercase())
            .collect();

        Self {
            include_patterns,
            exclude_patterns,
            allowed_domains,
        }
    }

    /// Determine whether a URL passes the admission rules
    pub fn should_crawl(&self, url: &str) -> bool {
        let normalized = normalize_url(url);

        let parsed = match Url::parse(&normalized) {
            Ok(url) => url,
            Err(e) => {
                debug!("Skipping invalid URL {}: {}", normalized, e);
                return false;
            }
        };

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            debug!("Skipping URL with scheme '{}': {}", parsed.scheme(), normalized);
            return false;
        }

        let Some(host) = parsed.host_str() else {
            debug!("Skipping URL without host: {}", normalized);
            return false;
        };

        if !self.allowed_domains.is_empty() {
            let host = host.to_lowercase();
            let allowed = self
                .allowed_domains
                .iter()
                .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)));
            if !allowed {
                debug!("Skipping URL from non-allowed domain: {}", host);
                return false;
            }
        }

        for pattern in &self.exclude_patterns {
            if pattern.is_match(&normalized) {
                debug!("Skipping URL matching exclusion pattern: {}", normalized);
                return false;
            }
        }

        if !self.include_patterns.is_empty()
            && !self.include_patterns.iter().any(|p| p.is_match(&normalized))
        {
            debug!("Skipping URL not matching any inclusion pattern: {}", normalized);
            return false;
        }

        true
    }
}

/// Normalize a URL to avoid duplicates from cosmetic differences: lowercase
/// scheme and host, default ports and fragments stripped, query parameters
/// sorted, and a bare host given its trailing slash.
pub fn normalize_url(url: &str) -> String {
    let mut normalized = match Url::parse(url.trim()) {
        Ok(url) => url,
        // Can't normalize, return as is
        Err(_) => return url.trim().to_string(),
    };

    // The url crate already lowercases scheme and host and omits default
    // ports; the empty path renders as "/".
    normalized.set_fragment(None);

    if let Some(query) = normalized.query() {
        if !query.is_empty() {
            let mut params: Vec<(String, String)> = query
                .split('&')
                .map(|pair| {
                    let mut kv = pair.split('=');
                    (
                        kv.next().unwrap_or("").to_string(),
                        kv.next().unwrap_or("").to_string(),
                    )
                })
                .collect();
            params.sort_by(|a, b| a.0.cmp(&b.0));

            let sorted_query = params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<String>>()
                .join("&");
            normalized.set_query(Some(&sorted_query));
        }
    }

    normalized.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_rules() -> FilterRules {
        FilterRules {
            allowed_domains: vec!["example.com".to_string()],
            include_patterns: vec![],
            exclude_patterns: vec![r"\.(jpg|jpeg|png|gif|css|js)$".to_string()],
        }
    }

    #[test]
    fn allows_urls_in_allowed_domain() {
        let filter = UrlFilter::new(&example_rules());
        assert!(filter.should_crawl("https://example.com/page1"));
        assert!(filter.should_crawl("https://sub.example.com/page"));
    }

    #[test]
    fn rejects_other_domains() {
        let filter = UrlFilter::new(&example_rules());
        assert!(!filter.should_crawl("https://other.test/x"));
        // Suffix tricks do not count as subdomains.
        assert!(!filter.should_crawl("https://notexample.com/x"));
    }

    #[test]
    fn rejects_non_http_schemes_and_invalid_urls() {
        let filter = UrlFilter::new(&example_rules());
        assert!(!filter.should_crawl("ftp://example.com/file"));
        assert!(!filter.should_crawl("mailto:someone@example.com"));
        assert!(!filter.should_crawl("not a url"));
    }

    #[test]
    fn exclusion_patterns_win() {
        let filter = UrlFilter::new(&example_rules());
        assert!(!filter.should_crawl("https://example.com/image.jpg"));
        assert!(filter.should_crawl("https://example.com/image-gallery"));
    }

    #[test]
    fn inclusion_patterns_gate_when_present() {
        let rules = FilterRules {
            allowed_domains: vec![],
            include_patterns: vec![r"^https://example\.com/docs/.*$".to_string()],
            exclude_patterns: vec![],
        };
        let filter = UrlFilter::new(&rules);
        assert!(filter.should_crawl("https://example.com/docs/intro"));
        assert!(!filter.should_crawl("https://example.com/blog/post"));
    }

    #[test]
    fn empty_rules_allow_any_http_url() {
        let filter = UrlFilter::new(&FilterRules::default());
        assert!(filter.should_crawl("https://anything.test/page"));
    }

    #[test]
    fn normalization_canonicalizes_cosmetic_differences() {
        assert_eq!(
            normalize_url("https://EXAMPLE.com/path"),
            "https://example.com/path"
        );
        assert_eq!(
            normalize_url("https://example.com:443/path"),
            "https://example.com/path"
        );
        assert_eq!(normalize_url("https://example.com"), "https://example.com/");
        assert_eq!(
            normalize_url("https://example.com/search?b=2&a=1"),
            "https://example.com/search?a=1&b=2"
        );
        assert_eq!(
            normalize_url("https://example.com/page#section"),
            "https://example.com/page"
        );
    }
}
