use std::path::Path;

use console::style;

use crate::ledger::{Ledger, STATUS_FILE};
use crate::pages::ScrapedPages;
use crate::session;
use crate::utils::paths::clean_path_input;
use crate::{Error, Result};

/// Handles `status`: prints what a download folder has tracked.
pub async fn status_command(dir: &Path) -> Result<()> {
    let dir = clean_path_input(&dir.to_string_lossy());
    if !dir.is_dir() {
        return Err(Error::Config(format!("{} is not a folder", dir.display())));
    }

    println!("{}", style(dir.display()).cyan().bold());

    match session::load(&dir) {
        Some(job) => {
            println!(
                "  Unfinished job: {} (pages {} → {}, started {})",
                job.locator,
                job.start_page,
                job.end_page,
                job.created_at.format("%Y-%m-%d %H:%M")
            );
            let pages = ScrapedPages::open(&dir, &job.locator)?;
            let done = (job.end_page..=job.start_page).filter(|p| pages.contains(*p)).count();
            println!("  Scraped pages: {} of {}", done, job.start_page.saturating_sub(job.end_page) + 1);
        }
        None => println!("  No unfinished job"),
    }

    // Opening would create an empty ledger in an untouched folder
    if !dir.join(STATUS_FILE).exists() {
        println!("  No videos tracked yet");
        return Ok(());
    }

    let counts = Ledger::open(&dir)?.counts();
    println!("  Tracked videos: {}", counts.total());
    println!("    {} completed: {}", style("✓").green(), counts.completed);
    println!("    {} failed:    {}", style("✗").red(), counts.failed);
    println!("    {} timeout:   {}", style("✗").red(), counts.timeout);
    println!("    {} error:     {}", style("✗").red(), counts.error);
    println!("    {} pending:   {}", style("…").yellow(), counts.pending);
    Ok(())
}
