use console::style;

use crate::utils::update::{check_for_update, UpdateStatus, CURRENT_VERSION};
use crate::{Config, Result};

/// Handles `check-update`.
pub async fn update_command(config: &Config) -> Result<()> {
    println!("Checking for updates...");

    match check_for_update(&config.release_feed_url, &config.user_agent).await? {
        UpdateStatus::UpToDate => {
            println!("{} You're up to date (v{})", style("✓").green(), CURRENT_VERSION);
        }
        UpdateStatus::Available { latest } => {
            println!("{} New version available: v{}", style("!").yellow(), latest);
            println!("  You have: v{}", CURRENT_VERSION);
        }
        UpdateStatus::NoReleases => {
            println!("No releases published yet. You're on v{}", CURRENT_VERSION);
        }
    }
    Ok(())
}
