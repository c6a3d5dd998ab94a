use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::{CrawlError, CrawlResult};
use crate::fetch::{FetchedPage, Fetcher};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USER_AGENT: &str = concat!("trawler/", env!("CARGO_PKG_VERSION"));

/// HTTP fetcher backed by a shared reqwest client
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64, user_agent: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    fn map_error(url: &str, err: reqwest::Error) -> CrawlError {
        if err.is_timeout() {
            CrawlError::Timeout(format!("fetching {}", url))
        } else {
            CrawlError::Network(format!("{}: {}", url, err))
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> CrawlResult<FetchedPage> {
        debug!("Fetching {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::map_error(url, e))?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(CrawlError::Http(status));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let body = response
            .text()
            .await
            .map_err(|e| Self::map_error(url, e))?;

        let (title, text, links) = parse_html(&body, &final_url);

        Ok(FetchedPage {
            url: final_url,
            status_code: status,
            content_type,
            title,
            text,
            links,
        })
    }
}

/// Extract the title, visible text, and absolute link targets from an HTML
/// document. Relative hrefs are resolved against the final URL.
fn parse_html(body: &str, base_url: &str) -> (Option<String>, String, Vec<String>) {
    let document = Html::parse_document(body);

    let title_selector = Selector::parse("title").expect("valid title selector");
    let title = document
        .select(&title_selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let body_selector = Selector::parse("body").expect("valid body selector");
    let text = match document.select(&body_selector).next() {
        Some(body_el) => body_el.text().collect::<Vec<_>>().join(" "),
        None => document.root_element().text().collect::<Vec<_>>().join(" "),
    };
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let link_selector = Selector::parse("a[href]").expect("valid link selector");
    let base = Url::parse(base_url).ok();
    let mut links = Vec::new();
    for element in document.select(&link_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let resolved = match Url::parse(href) {
            Ok(absolute) => Some(absolute),
            Err(_) => base.as_ref().and_then(|b| b.join(href).ok()),
        };
        if let Some(url) = resolved {
            links.push(url.to_string());
        }
    }

    (title, text, links)
}
