use std::path::Path;
use std::sync::Arc;

use console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;
use tokio_util::sync::CancellationToken;

use super::RunArgs;
use crate::dispatch::{AlwaysContinue, BatchGate, DispatchSummary, Dispatcher};
use crate::ledger::{Ledger, StatusCounts};
use crate::pages::ScrapedPages;
use crate::scrape::{ScrapeSummary, Scheduler};
use crate::session::{self, JobSession};
use crate::site::{Enumerator, HttpPageSource, PageCount};
use crate::utils::paths::{clean_path_input, ensure_target_dir};
use crate::utils::progress::{DownloadBar, DownloadProgress, NoProgress, ScrapeBar, ScrapeProgress};
use crate::utils::format_duration;
use crate::{Config, Error, ErrorExt, Result};

/// Rough per-video wall time used for the estimate shown before downloading.
const AVG_SECONDS_PER_VIDEO: u64 = 10;

/// What a job run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobReport {
    pub scrape: ScrapeSummary,
    /// `None` when the scrape was interrupted and downloading never started.
    pub dispatch: Option<DispatchSummary>,
    pub counts: StatusCounts,
    /// The job completed and its session file was removed.
    pub session_cleared: bool,
}

/// Runs a terminal prompt from async code without stalling the worker it
/// was called on. Needs the multi-threaded runtime.
fn blocking_prompt<T>(prompt: impl FnOnce() -> T) -> T {
    tokio::task::block_in_place(prompt)
}

/// Asks the operator before every batch after the first.
pub struct PromptGate;

impl BatchGate for PromptGate {
    fn should_continue(&self, finished_batch: usize, remaining: usize) -> bool {
        let answer = blocking_prompt(|| {
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(format!(
                    "Batch {} done, {} videos left. Continue with the next batch?",
                    finished_batch, remaining
                ))
                .default(true)
                .interact()
        });
        match answer {
            Ok(answer) => answer,
            Err(e) => {
                log::warn!("Batch prompt failed, stopping: {}", e);
                false
            }
        }
    }
}

/// Start page for a listing whose last page is `last_page`.
///
/// An explicit start wins but is kept inside `[1, last_page]`.
pub fn resolve_start_page(last_page: u32, requested: Option<u32>) -> u32 {
    let last_page = last_page.max(1);
    match requested {
        Some(start) => start.clamp(1, last_page),
        None => last_page,
    }
}

pub(crate) fn enumerator(config: &Config) -> Result<Enumerator> {
    let source = HttpPageSource::from_config(config)?;
    Enumerator::new(Arc::new(source), &config.base_url)
}

/// Handles `run`.
pub async fn run_command(args: RunArgs, config: Config) -> Result<()> {
    let locator = args.locator()?;

    let mut config = config;
    if let Some(workers) = args.workers {
        config = config.with_download_workers(workers);
    }
    if let Some(batch_size) = args.batch_size {
        config = config.with_batch_size(batch_size);
    }

    let target_dir = match &args.dir {
        Some(dir) => clean_path_input(&dir.to_string_lossy()),
        None => config.download_dir.join(locator.folder_name()),
    };

    let enumerator = enumerator(&config)?;
    let last_page = match args.pages {
        Some(0) => return Err(Error::Config("--pages must be at least 1".into())),
        Some(pages) => pages,
        None if args.detect || config.auto_detect_pages => {
            println!("Detecting page count for {}...", locator);
            match enumerator.detect_page_count(&locator).await? {
                PageCount::Known(last) => {
                    println!("  {} Found {} pages", style("✓").green(), last);
                    last
                }
                PageCount::Unknown => {
                    return Err(Error::Config(format!(
                        "could not detect the page count of {}, pass --pages",
                        locator
                    )))
                }
            }
        }
        None => {
            return Err(Error::Config(
                "page count unknown: pass --pages or --detect (auto_detect_pages is off)".into(),
            ))
        }
    };

    let job = JobSession::new(locator, resolve_start_page(last_page, args.start), target_dir)?;
    launch(&config, job, enumerator, !args.yes).await.map(|_| ())
}

/// Handles `resume`.
pub async fn resume_command(dir: &Path, yes: bool, config: Config) -> Result<()> {
    let dir = clean_path_input(&dir.to_string_lossy());
    let mut job = session::load(&dir)
        .ok_or_else(|| Error::Config(format!("no resumable session in {}", dir.display())))?;
    // The folder may have been moved since the session was written
    job.target_directory = dir;

    let enumerator = enumerator(&config)?;
    launch(&config, job, enumerator, !yes).await.map(|_| ())
}

/// Prepares the folder, shows the job, asks for confirmation when
/// `interactive`, then runs it with Ctrl-C wired to cancellation.
///
/// Returns `None` if the operator declined.
pub(crate) async fn launch(
    config: &Config,
    job: JobSession,
    enumerator: Enumerator,
    interactive: bool,
) -> Result<Option<JobReport>> {
    if ensure_target_dir(&job.target_directory)? {
        println!("  {} Created folder {}", style("✓").green(), job.target_directory.display());
    }
    session::save(&job)?;

    let (ledger, pages) = open_stores(&job)?;
    print_job_summary(&job, &ledger, &pages);

    if interactive
        && !blocking_prompt(|| {
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt("Start?")
                .default(true)
                .interact()
        })?
    {
        println!("Cancelled. Run `thisvid-ripper resume --dir {}` to pick it up later.", job.target_directory.display());
        return Ok(None);
    }

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupt received, stopping");
                cancel.cancel();
            }
        })
    };

    let scheduler = Scheduler::from_config(enumerator, config);
    let dispatcher = Dispatcher::from_config(config);
    let gate: &dyn BatchGate = if interactive { &PromptGate } else { &AlwaysContinue };

    let report = if config.show_progress {
        execute_job(&job, &ledger, &pages, &scheduler, &dispatcher, gate, &ScrapeBar::new(), &DownloadBar::new(), &cancel)
            .await
    } else {
        execute_job(&job, &ledger, &pages, &scheduler, &dispatcher, gate, &NoProgress, &NoProgress, &cancel).await
    };
    watcher.abort();

    let report = report?;
    print_final_tally(&job, &report);
    Ok(Some(report))
}

/// Opens the folder's ledger and the job's page record.
fn open_stores(job: &JobSession) -> Result<(Ledger, ScrapedPages)> {
    let dir = &job.target_directory;
    let ledger = Ledger::open(dir).map_err(|e| e.context(format!("opening the video ledger in {}", dir.display())))?;
    let pages = ScrapedPages::open(dir, &job.locator)
        .map_err(|e| e.context(format!("opening the page record in {}", dir.display())))?;
    Ok((ledger, pages))
}

fn print_job_summary(job: &JobSession, ledger: &Ledger, pages: &ScrapedPages) {
    let counts = ledger.counts();
    let already_scraped = (job.end_page..=job.start_page).filter(|p| pages.contains(*p)).count();

    println!();
    println!("{}", style("Job").cyan().bold());
    println!("  Type:       {}", job.locator.kind());
    println!("  Identifier: {}", job.locator.identifier());
    println!("  Pages:      {} → {}", job.start_page, job.end_page);
    println!("  Folder:     {}", job.target_directory.display());
    println!("  Already scraped pages: {}", already_scraped);
    println!(
        "  Tracked videos: {} ({} completed, {} failed, {} pending)",
        counts.total(),
        counts.completed,
        counts.failures(),
        counts.pending
    );
    println!();
}

/// Scrapes the job's page range, then downloads everything pending.
///
/// Downloading is skipped when the scrape was interrupted. The session file is
/// removed once every page is scraped and every batch ran.
#[allow(clippy::too_many_arguments)]
pub async fn execute_job(
    job: &JobSession,
    ledger: &Ledger,
    pages: &ScrapedPages,
    scheduler: &Scheduler,
    dispatcher: &Dispatcher,
    gate: &dyn BatchGate,
    scrape_progress: &dyn ScrapeProgress,
    download_progress: &dyn DownloadProgress,
    cancel: &CancellationToken,
) -> Result<JobReport> {
    let scrape = scheduler
        .run(ledger, pages, &job.locator, job.start_page, job.end_page, scrape_progress, cancel)
        .await?;
    println!(
        "  Scraped {} pages ({} skipped, {} failed), {} new videos",
        scrape.pages_scraped, scrape.pages_skipped, scrape.pages_failed, scrape.new_videos
    );

    if scrape.cancelled {
        return Ok(JobReport {
            scrape,
            dispatch: None,
            counts: ledger.counts(),
            session_cleared: false,
        });
    }

    let pending = ledger.counts().pending;
    if pending > 0 {
        println!(
            "  {} videos to download, roughly {}",
            pending,
            format_duration(pending as u64 * AVG_SECONDS_PER_VIDEO)
        );
    }

    let dispatch = dispatcher
        .run(ledger, &job.target_directory, gate, download_progress, cancel)
        .await?;

    if let Err(e) = ledger.compact() {
        log::warn!("Could not compact {:?}: {}", ledger.path(), e);
    }

    let session_cleared = scrape.is_complete() && dispatch.finished();
    if session_cleared {
        session::clear(&job.target_directory)?;
        // A later job for the same locator starts from the last page again
        pages.clear()?;
    }

    Ok(JobReport {
        scrape,
        dispatch: Some(dispatch),
        counts: ledger.counts(),
        session_cleared,
    })
}

fn print_final_tally(job: &JobSession, report: &JobReport) {
    let counts = &report.counts;
    println!();
    println!("{}", style("Summary").cyan().bold());
    println!("  {} Completed: {}", style("✓").green(), counts.completed);
    println!(
        "  {} Failed:    {} ({} failed, {} timed out, {} errored)",
        style("✗").red(),
        counts.failures(),
        counts.failed,
        counts.timeout,
        counts.error
    );
    println!("  {} Pending:   {}", style("…").yellow(), counts.pending);

    let interrupted = report.dispatch.map_or(true, |d| d.cancelled) || report.scrape.cancelled;
    if !report.session_cleared {
        if interrupted {
            println!("\n  Interrupted.");
        }
        println!(
            "  Resume with: thisvid-ripper resume --dir {}",
            job.target_directory.display()
        );
    }
}
