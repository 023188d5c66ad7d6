//! Downloads pending ledger entries in batches, one `yt-dlp` process per video.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::OutputStyle;
use crate::ledger::{Ledger, VideoStatus};
use crate::utils::progress::DownloadProgress;
use crate::{Config, Error, Result};

pub const DEFAULT_DOWNLOAD_WORKERS: usize = 4;
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Downloads one video into a directory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoFetcher: Send + Sync {
    async fn fetch(&self, id: &str, target_dir: &Path) -> Result<()>;
}

/// Maps a fetch result onto the status written to the ledger.
pub fn classify(result: &Result<()>) -> VideoStatus {
    match result {
        Ok(()) => VideoStatus::Completed,
        Err(Error::DownloadFailed { .. }) => VideoStatus::Failed,
        Err(Error::DownloadTimeout { .. }) => VideoStatus::Timeout,
        Err(_) => VideoStatus::Error,
    }
}

/// [`VideoFetcher`] that shells out to yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
    output_style: OutputStyle,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            output_style: OutputStyle::Dash,
            timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ytdlp_command())
            .with_output_style(config.output_style)
            .with_timeout(config.download_timeout())
    }

    #[must_use]
    pub fn with_output_style(mut self, style: OutputStyle) -> Self {
        self.output_style = style;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Output template handed to `-o`.
    pub fn output_template(&self, target_dir: &Path) -> PathBuf {
        target_dir.join(self.output_style.template())
    }

    fn command(&self, id: &str, target_dir: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["--format", "best", "--no-warnings", "--quiet", "--no-progress", "-o"])
            .arg(self.output_template(target_dir))
            .arg(id)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl VideoFetcher for YtDlp {
    async fn fetch(&self, id: &str, target_dir: &Path) -> Result<()> {
        let child = self.command(id, target_dir).spawn().map_err(|e| Error::CommandExecution {
            command: self.program.clone(),
            reason: e.to_string(),
        })?;

        // Dropping the child on timeout kills the process
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| Error::CommandExecution {
                command: self.program.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                return Err(Error::DownloadTimeout {
                    id: id.to_string(),
                    limit: self.timeout,
                })
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(String::from)
            .unwrap_or_else(|| output.status.to_string());
        Err(Error::DownloadFailed {
            id: id.to_string(),
            reason,
        })
    }
}

/// Asked between batches whether to go on.
pub trait BatchGate: Send + Sync {
    /// `finished_batch` is 1-based; `remaining` counts ids not yet attempted.
    fn should_continue(&self, finished_batch: usize, remaining: usize) -> bool;
}

/// Never stops between batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysContinue;

impl BatchGate for AlwaysContinue {
    fn should_continue(&self, _finished_batch: usize, _remaining: usize) -> bool {
        true
    }
}

/// Outcome counts for one batch, or summed over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTally {
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub errored: usize,
}

impl BatchTally {
    fn record(&mut self, status: VideoStatus) {
        match status {
            VideoStatus::Completed => self.completed += 1,
            VideoStatus::Failed => self.failed += 1,
            VideoStatus::Timeout => self.timed_out += 1,
            VideoStatus::Error => self.errored += 1,
            VideoStatus::Pending => {}
        }
    }

    fn add(&mut self, other: &BatchTally) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
        self.errored += other.errored;
    }

    /// Everything that didn't complete.
    pub fn failures(&self) -> usize {
        self.failed + self.timed_out + self.errored
    }

    pub fn total(&self) -> usize {
        self.completed + self.failures()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Pending ids when the run started.
    pub queued: usize,
    pub batches_total: usize,
    pub batches_run: usize,
    pub tally: BatchTally,
    /// The gate declined to continue.
    pub stopped_early: bool,
    pub cancelled: bool,
}

impl DispatchSummary {
    /// Ids that got a terminal status during this run.
    pub fn attempted(&self) -> usize {
        self.tally.total()
    }

    /// Every batch ran to the end.
    pub fn finished(&self) -> bool {
        !self.stopped_early && !self.cancelled && self.batches_run == self.batches_total
    }
}

pub struct Dispatcher {
    fetcher: Arc<dyn VideoFetcher>,
    workers: usize,
    batch_size: usize,
}

impl Dispatcher {
    pub fn new(fetcher: Arc<dyn VideoFetcher>) -> Self {
        Self {
            fetcher,
            workers: DEFAULT_DOWNLOAD_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(YtDlp::from_config(config)))
            .with_workers(config.download_workers)
            .with_batch_size(config.batch_size)
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Downloads every `pending` id in the ledger into `target_dir`.
    ///
    /// Ids are taken in discovery order and cut into batches of
    /// `batch_size`; each batch runs up to `workers` downloads at once.
    /// Every outcome is written to the ledger before it is counted. After a
    /// batch, `gate` decides whether the next one starts; declining leaves
    /// the rest `pending`. A cancelled download is not recorded at all.
    pub async fn run(
        &self,
        ledger: &Ledger,
        target_dir: &Path,
        gate: &dyn BatchGate,
        progress: &dyn DownloadProgress,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary> {
        let pending = ledger.pending();
        let batches: Vec<&[String]> = pending.chunks(self.batch_size).collect();
        let mut summary = DispatchSummary {
            queued: pending.len(),
            batches_total: batches.len(),
            ..DispatchSummary::default()
        };

        if pending.is_empty() {
            log::info!("Nothing pending in {:?}", ledger.path());
            return Ok(summary);
        }
        log::info!(
            "Downloading {} videos in {} batches of up to {}",
            pending.len(),
            batches.len(),
            self.batch_size
        );

        let mut handed_out = 0;
        for (index, batch) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let number = index + 1;
            progress.on_batch_start(number, summary.batches_total, batch.len());
            let tally = self.run_batch(ledger, target_dir, batch, progress, cancel).await?;
            progress.on_batch_finish(number, &tally);

            summary.batches_run += 1;
            summary.tally.add(&tally);
            handed_out += batch.len();

            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if number < summary.batches_total && !gate.should_continue(number, pending.len() - handed_out) {
                log::info!("Stopping after batch {}, {} videos left pending", number, pending.len() - handed_out);
                summary.stopped_early = true;
                break;
            }
        }

        Ok(summary)
    }

    async fn run_batch(
        &self,
        ledger: &Ledger,
        target_dir: &Path,
        batch: &[String],
        progress: &dyn DownloadProgress,
        cancel: &CancellationToken,
    ) -> Result<BatchTally> {
        let fetcher = &self.fetcher;
        let mut outcomes = stream::iter(batch)
            .map(|id| async move {
                if cancel.is_cancelled() {
                    return (id, None);
                }
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = fetcher.fetch(id, target_dir) => Some(result),
                };
                (id, result)
            })
            .buffer_unordered(self.workers);

        let mut tally = BatchTally::default();
        while let Some((id, result)) = outcomes.next().await {
            let Some(result) = result else {
                continue;
            };
            if let Err(e) = &result {
                log::warn!("{}", e);
            }
            let status = classify(&result);
            ledger.set_status(id, status)?;
            tally.record(status);
            progress.on_video_done(id, status);
        }
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::progress::NoProgress;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn video(name: &str) -> String {
        format!("https://thisvid.com/videos/{}/", name)
    }

    fn seeded_ledger(dir: &Path, names: &[&str]) -> Ledger {
        let ledger = Ledger::open(dir).unwrap();
        for name in names {
            ledger.record_if_new(&video(name)).unwrap();
        }
        ledger
    }

    /// Declines after a fixed number of batches and remembers what it was told.
    struct StopAfter {
        batches: usize,
        asked: Mutex<Vec<(usize, usize)>>,
    }

    impl BatchGate for StopAfter {
        fn should_continue(&self, finished_batch: usize, remaining: usize) -> bool {
            self.asked.lock().unwrap().push((finished_batch, remaining));
            finished_batch < self.batches
        }
    }

    /// Never finishes a download.
    struct Hang;

    #[async_trait]
    impl VideoFetcher for Hang {
        async fn fetch(&self, _id: &str, _target_dir: &Path) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_recorded_as_failed() {
        let dir = TempDir::new().unwrap();
        let ledger = seeded_ledger(dir.path(), &["a", "b"]);

        let mut fetcher = MockVideoFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|id, _| id.ends_with("/b/"))
            .times(1)
            .returning(|id, _| {
                Err(Error::DownloadFailed {
                    id: id.to_string(),
                    reason: "exit status: 1".into(),
                })
            });
        fetcher.expect_fetch().withf(|id, _| id.ends_with("/a/")).times(1).returning(|_, _| Ok(()));

        let summary = Dispatcher::new(Arc::new(fetcher))
            .run(&ledger, dir.path(), &AlwaysContinue, &NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ledger.status(&video("a")), Some(VideoStatus::Completed));
        assert_eq!(ledger.status(&video("b")), Some(VideoStatus::Failed));
        assert_eq!(summary.tally.completed, 1);
        assert_eq!(summary.tally.failures(), 1);
        assert!(summary.finished());
        assert_eq!(ledger.counts().failures(), 1);
    }

    #[tokio::test]
    async fn test_only_pending_ids_are_fetched() {
        let dir = TempDir::new().unwrap();
        let ledger = seeded_ledger(dir.path(), &["done", "todo", "broken"]);
        ledger.set_status(&video("done"), VideoStatus::Completed).unwrap();
        ledger.set_status(&video("broken"), VideoStatus::Failed).unwrap();

        let mut fetcher = MockVideoFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|id, _| id.ends_with("/todo/"))
            .times(1)
            .returning(|_, _| Ok(()));

        let summary = Dispatcher::new(Arc::new(fetcher))
            .run(&ledger, dir.path(), &AlwaysContinue, &NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.queued, 1);
        assert_eq!(ledger.status(&video("todo")), Some(VideoStatus::Completed));
        assert_eq!(ledger.status(&video("broken")), Some(VideoStatus::Failed));
    }

    #[tokio::test]
    async fn test_empty_ledger_runs_no_batches() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();

        let summary = Dispatcher::new(Arc::new(MockVideoFetcher::new()))
            .run(&ledger, dir.path(), &AlwaysContinue, &NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary, DispatchSummary::default());
        assert!(summary.finished());
    }

    #[tokio::test]
    async fn test_declined_gate_leaves_rest_pending() {
        let dir = TempDir::new().unwrap();
        let ledger = seeded_ledger(dir.path(), &["a", "b", "c", "d", "e"]);

        let mut fetcher = MockVideoFetcher::new();
        fetcher.expect_fetch().times(2).returning(|_, _| Ok(()));
        let gate = StopAfter { batches: 0, asked: Mutex::new(Vec::new()) };

        let summary = Dispatcher::new(Arc::new(fetcher))
            .with_batch_size(2)
            .with_workers(1)
            .run(&ledger, dir.path(), &gate, &NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.stopped_early);
        assert!(!summary.finished());
        assert_eq!(summary.batches_total, 3);
        assert_eq!(summary.batches_run, 1);
        assert_eq!(*gate.asked.lock().unwrap(), vec![(1, 3)]);

        // Discovery order: the first batch is a and b
        assert_eq!(ledger.pending(), vec![video("c"), video("d"), video("e")]);
    }

    #[tokio::test]
    async fn test_gate_not_asked_after_last_batch() {
        let dir = TempDir::new().unwrap();
        let ledger = seeded_ledger(dir.path(), &["a", "b", "c"]);

        let mut fetcher = MockVideoFetcher::new();
        fetcher.expect_fetch().times(3).returning(|_, _| Ok(()));
        let gate = StopAfter { batches: usize::MAX, asked: Mutex::new(Vec::new()) };

        let summary = Dispatcher::new(Arc::new(fetcher))
            .with_batch_size(2)
            .run(&ledger, dir.path(), &gate, &NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.finished());
        assert_eq!(*gate.asked.lock().unwrap(), vec![(1, 1)]);
        assert!(ledger.pending().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_and_error_are_classified() {
        let dir = TempDir::new().unwrap();
        let ledger = seeded_ledger(dir.path(), &["slow", "nospawn"]);

        let mut fetcher = MockVideoFetcher::new();
        fetcher.expect_fetch().withf(|id, _| id.contains("slow")).returning(|id, _| {
            Err(Error::DownloadTimeout {
                id: id.to_string(),
                limit: Duration::from_secs(600),
            })
        });
        fetcher.expect_fetch().withf(|id, _| id.contains("nospawn")).returning(|_, _| {
            Err(Error::CommandExecution {
                command: "yt-dlp".into(),
                reason: "No such file or directory".into(),
            })
        });

        let summary = Dispatcher::new(Arc::new(fetcher))
            .run(&ledger, dir.path(), &AlwaysContinue, &NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ledger.status(&video("slow")), Some(VideoStatus::Timeout));
        assert_eq!(ledger.status(&video("nospawn")), Some(VideoStatus::Error));
        assert_eq!(summary.tally.timed_out, 1);
        assert_eq!(summary.tally.errored, 1);
        assert_eq!(summary.tally.failures(), 2);
    }

    #[tokio::test]
    async fn test_cancel_leaves_in_flight_pending() {
        let dir = TempDir::new().unwrap();
        let ledger = seeded_ledger(dir.path(), &["a", "b", "c"]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let summary = Dispatcher::new(Arc::new(Hang))
            .with_batch_size(1)
            .run(&ledger, dir.path(), &AlwaysContinue, &NoProgress, &cancel)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.attempted(), 0);
        assert_eq!(ledger.pending().len(), 3);
    }

    #[tokio::test]
    async fn test_workers_bound_concurrency() {
        struct Counting {
            running: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl VideoFetcher for Counting {
            async fn fetch(&self, _id: &str, _target_dir: &Path) -> Result<()> {
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let names: Vec<String> = (0..8).map(|i| format!("v{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let ledger = seeded_ledger(dir.path(), &refs);
        let fetcher = Arc::new(Counting { running: AtomicUsize::new(0), peak: AtomicUsize::new(0) });

        Dispatcher::new(fetcher.clone())
            .with_workers(2)
            .run(&ledger, dir.path(), &AlwaysContinue, &NoProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert!(fetcher.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(ledger.counts().completed, 8);
    }

    #[test]
    fn test_output_template_follows_style() {
        let dir = Path::new("/data/tag-feet");
        assert_eq!(
            YtDlp::new("yt-dlp").output_template(dir),
            dir.join("%(title)s - [%(id)s].%(ext)s")
        );
        assert_eq!(
            YtDlp::new("yt-dlp").with_output_style(OutputStyle::Plain).output_template(dir),
            dir.join("%(title)s [%(id)s].%(ext)s")
        );
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&Ok(())), VideoStatus::Completed);
        assert_eq!(
            classify(&Err(Error::DownloadFailed { id: "x".into(), reason: "r".into() })),
            VideoStatus::Failed
        );
        assert_eq!(classify(&Err(Error::Config("x".into()))), VideoStatus::Error);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_maps_to_outcome() {
        let dir = TempDir::new().unwrap();

        assert!(YtDlp::new("true").fetch(&video("a"), dir.path()).await.is_ok());
        assert!(matches!(
            YtDlp::new("false").fetch(&video("a"), dir.path()).await,
            Err(Error::DownloadFailed { .. })
        ));
        assert!(matches!(
            YtDlp::new("/nonexistent/yt-dlp").fetch(&video("a"), dir.path()).await,
            Err(Error::CommandExecution { .. })
        ));
    }

    /// Writes an executable stand-in for yt-dlp that records its pid and
    /// then hangs.
    #[cfg(unix)]
    fn hanging_downloader(dir: &Path) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let pid_file = dir.join("downloader.pid");
        let script = dir.join("hanging-yt-dlp");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho $$ > '{}'\nexec sleep 30\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script, pid_file)
    }

    /// Still running, as opposed to gone or a zombie waiting to be reaped.
    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .map_or(false, |state| state != "Z" && state != "X"),
            Err(_) => false,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hanging_download_times_out() {
        let dir = TempDir::new().unwrap();
        let (script, pid_file) = hanging_downloader(dir.path());
        let fetcher = YtDlp::new(script.to_string_lossy()).with_timeout(Duration::from_secs(1));

        let started = std::time::Instant::now();
        let mut result = fetcher.fetch(&video("slow"), dir.path()).await;
        // A freshly written script can be briefly busy while another test forks
        for _ in 0..5 {
            match &result {
                Err(Error::CommandExecution { reason, .. }) if reason.contains("busy") => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    result = fetcher.fetch(&video("slow"), dir.path()).await;
                }
                _ => break,
            }
        }

        match result {
            Err(Error::DownloadTimeout { id, limit }) => {
                assert_eq!(id, video("slow"));
                assert_eq!(limit, Duration::from_secs(1));
            }
            other => panic!("expected a timeout, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(10));

        #[cfg(target_os = "linux")]
        {
            let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
            let mut alive = is_running(&pid);
            for _ in 0..40 {
                if !alive {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                alive = is_running(&pid);
            }
            assert!(!alive, "downloader {} outlived its timeout", pid);
        }
        #[cfg(not(target_os = "linux"))]
        let _ = pid_file;
    }
}
