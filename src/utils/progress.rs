use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::dispatch::BatchTally;
use crate::ledger::VideoStatus;
use crate::scrape::ScrapeSummary;
use crate::Error;

/// Callbacks from the scrape scheduler. All methods default to no-ops.
pub trait ScrapeProgress: Send + Sync {
    /// Called once with the number of pages that will be fetched.
    fn on_start(&self, _pages: usize) {}

    fn on_page_done(&self, _page: u32, _new_videos: usize) {}

    fn on_page_failed(&self, _page: u32, _error: &Error) {}

    fn on_finish(&self, _summary: &ScrapeSummary) {}
}

/// Callbacks from the download dispatcher. All methods default to no-ops.
pub trait DownloadProgress: Send + Sync {
    fn on_batch_start(&self, _batch: usize, _total_batches: usize, _size: usize) {}

    fn on_video_done(&self, _id: &str, _status: VideoStatus) {}

    fn on_batch_finish(&self, _batch: usize, _tally: &BatchTally) {}
}

/// Ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ScrapeProgress for NoProgress {}

impl DownloadProgress for NoProgress {}

fn bar_style(label: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(&format!(
            "  {} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{percent}}%) {{msg}}",
            label
        ))
        .unwrap()
        .progress_chars("█▓░")
}

/// Progress bar over the pages being scraped.
pub struct ScrapeBar {
    bar: ProgressBar,
}

impl ScrapeBar {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(bar_style("Scraping"));
        Self { bar }
    }
}

impl Default for ScrapeBar {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrapeProgress for ScrapeBar {
    fn on_start(&self, pages: usize) {
        self.bar.set_length(pages as u64);
        self.bar.set_position(0);
        self.bar.enable_steady_tick(Duration::from_millis(250));
    }

    fn on_page_done(&self, page: u32, new_videos: usize) {
        self.bar.set_message(format!("page {} (+{})", page, new_videos));
        self.bar.inc(1);
    }

    fn on_page_failed(&self, page: u32, error: &Error) {
        self.bar
            .println(format!("  {} page {}: {}", style("✗").red(), page, error));
        self.bar.inc(1);
    }

    fn on_finish(&self, _summary: &ScrapeSummary) {
        self.bar.finish_and_clear();
    }
}

/// Progress bar over the videos of the current batch.
pub struct DownloadBar {
    bar: ProgressBar,
}

impl DownloadBar {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(bar_style("Downloading"));
        Self { bar }
    }
}

impl Default for DownloadBar {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadProgress for DownloadBar {
    fn on_batch_start(&self, batch: usize, total_batches: usize, size: usize) {
        println!();
        println!("  {}", style(format!("Batch {}/{} ({} videos)", batch, total_batches, size)).bold());
        self.bar.reset();
        self.bar.set_length(size as u64);
        self.bar.enable_steady_tick(Duration::from_millis(250));
    }

    fn on_video_done(&self, id: &str, status: VideoStatus) {
        if status != VideoStatus::Completed {
            self.bar
                .println(format!("  {} {} ({})", style("✗").red(), id, status));
        }
        self.bar.inc(1);
    }

    fn on_batch_finish(&self, batch: usize, tally: &BatchTally) {
        self.bar.finish_and_clear();
        println!(
            "  {} Batch {} complete: {} succeeded, {} failed",
            style("✓").green(),
            batch,
            tally.completed,
            tally.failures()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_progress_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoProgress>();
        assert_send_sync::<ScrapeBar>();
        assert_send_sync::<DownloadBar>();
    }

    #[test]
    fn test_bars_track_counts() {
        let scrape = ScrapeBar::new();
        scrape.on_start(3);
        scrape.on_page_done(3, 2);
        scrape.on_page_failed(2, &Error::Config("x".into()));
        assert_eq!(scrape.bar.position(), 2);
    }
}
