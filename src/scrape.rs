//! Walks a locator's listing pages from the highest page down to page 1 and
//! feeds every newly seen video into the ledger.

use std::time::Duration;

use futures::{stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::ledger::Ledger;
use crate::pages::ScrapedPages;
use crate::site::{Enumerator, Locator};
use crate::utils::progress::ScrapeProgress;
use crate::{Config, Error, Result};

pub const DEFAULT_SCRAPE_WORKERS: usize = 5;
pub const DEFAULT_SCRAPE_DELAY: Duration = Duration::from_millis(500);

/// What a scrape pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeSummary {
    /// Pages in the requested range.
    pub pages_total: usize,
    /// Pages skipped because an earlier run already enumerated them.
    pub pages_skipped: usize,
    pub pages_scraped: usize,
    pub pages_failed: usize,
    /// Ids that were not in the ledger before this pass.
    pub new_videos: usize,
    pub cancelled: bool,
}

impl ScrapeSummary {
    /// Every page in the range is now marked as scraped.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.pages_skipped + self.pages_scraped == self.pages_total
    }
}

enum PageOutcome {
    Scraped(usize),
    Failed(Error),
    Cancelled,
}

/// Rejects anything but `start >= end >= 1`.
pub fn validate_range(start_page: u32, end_page: u32) -> Result<()> {
    if end_page < 1 || start_page < end_page {
        return Err(Error::Config(format!(
            "invalid page range {} -> {} (pages run from a higher start down to 1)",
            start_page, end_page
        )));
    }
    Ok(())
}

pub struct Scheduler {
    enumerator: Enumerator,
    workers: usize,
    delay: Duration,
}

impl Scheduler {
    pub fn new(enumerator: Enumerator) -> Self {
        Self {
            enumerator,
            workers: DEFAULT_SCRAPE_WORKERS,
            delay: DEFAULT_SCRAPE_DELAY,
        }
    }

    pub fn from_config(enumerator: Enumerator, config: &Config) -> Self {
        Self::new(enumerator)
            .with_workers(config.scrape_workers)
            .with_delay(config.scrape_delay())
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Pause after every page fetch, applied per worker.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn enumerator(&self) -> &Enumerator {
        &self.enumerator
    }

    /// Scrapes `start_page, start_page - 1, ..., end_page`.
    ///
    /// Pages already in `pages` are not fetched. Pages are dispatched in
    /// descending order to at most `workers` concurrent fetches; completion
    /// order is whatever the network gives. A page is marked done only after
    /// all of its ids are in the ledger, and a page whose fetch fails stays
    /// unmarked for the next run.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        ledger: &Ledger,
        pages: &ScrapedPages,
        locator: &Locator,
        start_page: u32,
        end_page: u32,
        progress: &dyn ScrapeProgress,
        cancel: &CancellationToken,
    ) -> Result<ScrapeSummary> {
        validate_range(start_page, end_page)?;

        let todo = pages.remaining(start_page, end_page);
        let pages_total = (start_page - end_page + 1) as usize;
        let mut summary = ScrapeSummary {
            pages_total,
            pages_skipped: pages_total - todo.len(),
            ..ScrapeSummary::default()
        };

        if todo.is_empty() {
            log::info!("All {} pages of {} already scraped", pages_total, locator);
            progress.on_finish(&summary);
            return Ok(summary);
        }

        log::info!("Scraping {} pages of {} ({} already done)", todo.len(), locator, summary.pages_skipped);
        progress.on_start(todo.len());

        let mut results = stream::iter(todo)
            .map(|page| self.scrape_page(ledger, pages, locator, page, cancel))
            .buffer_unordered(self.workers);

        while let Some((page, outcome)) = results.next().await {
            match outcome {
                PageOutcome::Scraped(new_videos) => {
                    summary.pages_scraped += 1;
                    summary.new_videos += new_videos;
                    progress.on_page_done(page, new_videos);
                }
                PageOutcome::Failed(e) => {
                    summary.pages_failed += 1;
                    progress.on_page_failed(page, &e);
                }
                PageOutcome::Cancelled => summary.cancelled = true,
            }
        }

        progress.on_finish(&summary);
        Ok(summary)
    }

    async fn scrape_page(
        &self,
        ledger: &Ledger,
        pages: &ScrapedPages,
        locator: &Locator,
        page: u32,
        cancel: &CancellationToken,
    ) -> (u32, PageOutcome) {
        if cancel.is_cancelled() {
            return (page, PageOutcome::Cancelled);
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (page, PageOutcome::Cancelled),
            links = self.enumerator.enumerate(locator, page) => links,
        };

        // No await between here and the page mark, so an interrupt can't
        // split a page's ledger writes from its completion
        let outcome = match fetched.and_then(|links| record_page(ledger, pages, page, &links)) {
            Ok(new_videos) => {
                log::debug!("Page {}: {} new videos", page, new_videos);
                PageOutcome::Scraped(new_videos)
            }
            Err(e) => {
                log::warn!("Failed to scrape page {}: {}", page, e);
                PageOutcome::Failed(e)
            }
        };

        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        (page, outcome)
    }
}

fn record_page(ledger: &Ledger, pages: &ScrapedPages, page: u32, links: &[String]) -> Result<usize> {
    let mut new_videos = 0;
    for link in links {
        if ledger.record_if_new(link)? {
            new_videos += 1;
        }
    }
    pages.mark_done(page)?;
    Ok(new_videos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{VideoStatus, STATUS_FILE};
    use crate::site::page::fake::{listing, FakeSite};
    use crate::utils::progress::NoProgress;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    const BASE: &str = "https://thisvid.com";

    fn feet_site() -> FakeSite {
        FakeSite::new()
            .with_page("https://thisvid.com/tags/feet/3/", listing(&["/videos/a/", "/videos/b/"]))
            .with_page("https://thisvid.com/tags/feet/2/", listing(&["/videos/b/", "/videos/c/"]))
            .with_page("https://thisvid.com/tags/feet/1/", listing(&["/videos/c/", "/videos/d/"]))
    }

    fn scheduler(site: Arc<FakeSite>, workers: usize) -> Scheduler {
        Scheduler::new(Enumerator::new(site, BASE).unwrap())
            .with_workers(workers)
            .with_delay(Duration::ZERO)
    }

    fn stores(dir: &Path, locator: &Locator) -> (Ledger, ScrapedPages) {
        (Ledger::open(dir).unwrap(), ScrapedPages::open(dir, locator).unwrap())
    }

    fn feet() -> Locator {
        Locator::Tag("feet".into())
    }

    #[tokio::test]
    async fn test_overlapping_pages_record_each_video_once() {
        let dir = TempDir::new().unwrap();
        let locator = feet();
        let (ledger, pages) = stores(dir.path(), &locator);
        let site = Arc::new(feet_site());

        let summary = scheduler(site, 5)
            .run(&ledger, &pages, &locator, 3, 1, &NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.new_videos, 4);
        assert_eq!(summary.pages_scraped, 3);
        assert!(summary.is_complete());

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.len(), 4);
        for id in ["a", "b", "c", "d"] {
            let url = format!("https://thisvid.com/videos/{}/", id);
            assert_eq!(snapshot.get(&url), Some(&VideoStatus::Pending), "{}", url);
        }

        let rows = std::fs::read_to_string(dir.path().join(STATUS_FILE)).unwrap();
        assert_eq!(rows.lines().count(), 5);
    }

    #[tokio::test]
    async fn test_rerun_over_scraped_range_fetches_nothing() {
        let dir = TempDir::new().unwrap();
        let locator = feet();
        let (ledger, pages) = stores(dir.path(), &locator);
        let site = Arc::new(feet_site());
        let scheduler = scheduler(site.clone(), 3);
        let cancel = CancellationToken::new();

        scheduler.run(&ledger, &pages, &locator, 3, 1, &NoProgress, &cancel).await.unwrap();
        let before = ledger.snapshot();
        let fetches = site.fetched().len();

        // Fresh stores from disk, as a restarted process would have
        let (ledger, pages) = stores(dir.path(), &locator);
        let summary = scheduler.run(&ledger, &pages, &locator, 3, 1, &NoProgress, &cancel).await.unwrap();

        assert_eq!(site.fetched().len(), fetches);
        assert_eq!(summary.pages_skipped, 3);
        assert_eq!(summary.new_videos, 0);
        assert_eq!(ledger.snapshot(), before);
    }

    #[tokio::test]
    async fn test_failed_page_is_retried_next_run() {
        let dir = TempDir::new().unwrap();
        let locator = Locator::Category("gay-newest".into());
        let (ledger, pages) = stores(dir.path(), &locator);
        let site = Arc::new(
            FakeSite::new()
                .with_page("https://thisvid.com/gay-newest/3/", listing(&["/videos/a/"]))
                .with_page("https://thisvid.com/gay-newest/", listing(&["/videos/c/"])),
        );
        let scheduler = scheduler(site.clone(), 2);
        let cancel = CancellationToken::new();

        let summary = scheduler.run(&ledger, &pages, &locator, 3, 1, &NoProgress, &cancel).await.unwrap();
        assert_eq!(summary.pages_failed, 1);
        assert!(!summary.is_complete());
        assert!(!pages.contains(2));
        assert!(pages.contains(3) && pages.contains(1));

        site.set_page("https://thisvid.com/gay-newest/2/", listing(&["/videos/b/"]));
        let fetched_before = site.fetched().len();
        let summary = scheduler.run(&ledger, &pages, &locator, 3, 1, &NoProgress, &cancel).await.unwrap();

        assert!(summary.is_complete());
        assert_eq!(summary.new_videos, 1);
        assert_eq!(
            site.fetched()[fetched_before..].to_vec(),
            vec!["https://thisvid.com/gay-newest/2/".to_string()]
        );
    }

    #[tokio::test]
    async fn test_pages_dispatched_in_descending_order() {
        let dir = TempDir::new().unwrap();
        let (ledger, pages) = stores(dir.path(), &feet());
        let site = Arc::new(feet_site());

        scheduler(site.clone(), 1)
            .run(&ledger, &pages, &feet(), 3, 1, &NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            site.fetched(),
            vec![
                "https://thisvid.com/tags/feet/3/".to_string(),
                "https://thisvid.com/tags/feet/2/".to_string(),
                "https://thisvid.com/tags/feet/1/".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_run_marks_nothing() {
        let dir = TempDir::new().unwrap();
        let (ledger, pages) = stores(dir.path(), &feet());
        let site = Arc::new(feet_site());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = scheduler(site.clone(), 5)
            .run(&ledger, &pages, &feet(), 3, 1, &NoProgress, &cancel)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert!(site.fetched().is_empty());
        assert!(pages.is_empty());
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_range_is_rejected() {
        let dir = TempDir::new().unwrap();
        let locator = feet();
        let (ledger, pages) = stores(dir.path(), &locator);
        let site = Arc::new(feet_site());
        let scheduler = scheduler(site.clone(), 1);
        let cancel = CancellationToken::new();

        assert!(matches!(
            scheduler.run(&ledger, &pages, &locator, 1, 3, &NoProgress, &cancel).await,
            Err(Error::Config(_))
        ));
        assert!(matches!(
            scheduler.run(&ledger, &pages, &locator, 2, 0, &NoProgress, &cancel).await,
            Err(Error::Config(_))
        ));
        assert!(site.fetched().is_empty());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range(3, 1).is_ok());
        assert!(validate_range(1, 1).is_ok());
        assert!(validate_range(0, 0).is_err());
        assert!(validate_range(2, 5).is_err());
    }
}
