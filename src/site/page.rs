//! Fetching a listing page and pulling video links and pagination out of it.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use super::Locator;
use crate::{Config, Error, Result};

/// Anchors wrapping a video thumbnail on listing pages.
const THUMB_SELECTOR: &str = "a.tumbpu";
const PAGINATION_SELECTOR: &str = ".pagination a";
const LAST_LINK_SELECTOR: &str = "a.pagination-last, .pagination-last a, a.last, .last > a, a[rel=\"last\"]";

/// Source of raw listing HTML.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// GETs `url` and returns the body of a 2xx response.
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// [`PageSource`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.user_agent, config.request_timeout())
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

/// Outcome of page-count auto-detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCount {
    Known(u32),
    /// No pagination control and no last-page link; the operator has to say.
    Unknown,
}

/// Turns `(locator, page)` into the set of video ids on that page.
#[derive(Clone)]
pub struct Enumerator {
    source: Arc<dyn PageSource>,
    base: Url,
}

impl Enumerator {
    pub fn new(source: Arc<dyn PageSource>, base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| Error::Config(format!("invalid base URL {}: {}", base_url, e)))?;
        Ok(Self { source, base })
    }

    pub fn page_url(&self, locator: &Locator, page: u32) -> Result<Url> {
        let raw = locator.build_url(self.base.as_str(), page);
        Url::parse(&raw).map_err(|e| Error::InvalidUrl(format!("{}: {}", raw, e)))
    }

    /// Video ids on `page`, deduplicated, in document order.
    ///
    /// Network failures are returned as errors so the caller can leave the
    /// page unmarked; a page that parses to nothing is simply empty.
    pub async fn enumerate(&self, locator: &Locator, page: u32) -> Result<Vec<String>> {
        let url = self.page_url(locator, page)?;
        log::debug!("Fetching page {} at {}", page, url);
        let html = self.source.fetch(&url).await?;
        let links = extract_video_links(&html, &url);
        if links.is_empty() {
            log::info!("No video links on page {} ({})", page, url);
        }
        Ok(links)
    }

    /// Fetches page 1 and reads the last page number from its pagination.
    pub async fn detect_page_count(&self, locator: &Locator) -> Result<PageCount> {
        let url = self.page_url(locator, 1)?;
        let html = self.source.fetch(&url).await?;
        Ok(detect_last_page(&html))
    }
}

fn selector(cell: &'static OnceLock<Selector>, css: &'static str) -> &'static Selector {
    cell.get_or_init(|| Selector::parse(css).expect("static CSS selector is valid"))
}

/// Hrefs of thumbnail anchors, resolved against `page_url`.
pub fn extract_video_links(html: &str, page_url: &Url) -> Vec<String> {
    static THUMBS: OnceLock<Selector> = OnceLock::new();

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();

    document
        .select(selector(&THUMBS, THUMB_SELECTOR))
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty() && !href.starts_with('#'))
        .filter_map(|href| page_url.join(href).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(String::from)
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

/// Highest page number advertised by a listing page.
pub fn detect_last_page(html: &str) -> PageCount {
    static PAGINATION: OnceLock<Selector> = OnceLock::new();
    static LAST_LINK: OnceLock<Selector> = OnceLock::new();
    static ANY_LINK: OnceLock<Selector> = OnceLock::new();
    static LAST_TEXT: OnceLock<Regex> = OnceLock::new();

    let document = Html::parse_document(html);

    let max_label = document
        .select(selector(&PAGINATION, PAGINATION_SELECTOR))
        .filter_map(|a| a.text().collect::<String>().trim().parse::<u32>().ok())
        .max();
    if let Some(last) = max_label {
        return PageCount::Known(last);
    }

    let last_link = document
        .select(selector(&LAST_LINK, LAST_LINK_SELECTOR))
        .filter_map(|a| a.value().attr("href"))
        .find_map(trailing_page_number);
    if let Some(last) = last_link {
        return PageCount::Known(last);
    }

    // Unclassed pagers: any link labelled "Last" or "»"
    let last_text = LAST_TEXT.get_or_init(|| Regex::new(r"(?i)last|»").expect("static regex is valid"));
    let labelled = document
        .select(selector(&ANY_LINK, "a[href]"))
        .filter(|a| last_text.is_match(a.text().collect::<String>().trim()))
        .filter_map(|a| a.value().attr("href"))
        .find_map(trailing_page_number);
    match labelled {
        Some(last) => PageCount::Known(last),
        None => PageCount::Unknown,
    }
}

/// Page number at the end of a listing path, e.g. `/tags/feet/42/` → 42.
fn trailing_page_number(href: &str) -> Option<u32> {
    static TRAILING: OnceLock<Regex> = OnceLock::new();
    let re = TRAILING.get_or_init(|| Regex::new(r"/(\d+)/?(?:[?#].*)?$").expect("static regex is valid"));
    re.captures(href)?.get(1)?.as_str().parse().ok()
}
