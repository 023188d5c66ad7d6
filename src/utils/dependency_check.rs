use console::style;
use tokio::process::Command;

use crate::Config;

/// Command that points the config at a yt-dlp binary outside PATH.
pub const YTDLP_PATH_HINT: &str = "thisvid-ripper config set --key ytdlp_path --value /path/to/yt-dlp";

/// What external tools are installed
#[derive(Debug, Clone, Default)]
pub struct DependencyStatus {
    pub yt_dlp_available: bool,
    pub yt_dlp_version: Option<String>,
    pub ffmpeg_available: bool,
    pub ffmpeg_version: Option<String>,
}

/// Runs `<program> <flag>` and returns its first stdout line on success.
async fn first_output_line(program: &str, flag: &str) -> Option<String> {
    match Command::new(program).arg(flag).output().await {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Some(stdout.lines().next().unwrap_or("").trim().to_string())
        }
        Ok(output) => {
            log::debug!("{} {} exited with {}", program, flag, output.status);
            None
        }
        Err(e) => {
            log::debug!("Could not run {}: {}", program, e);
            None
        }
    }
}

/// `ffmpeg version 6.1.1-3ubuntu5 Copyright ...` → `6.1.1-3ubuntu5`
fn ffmpeg_version(first_line: &str) -> String {
    match first_line.find("version ") {
        Some(start) => first_line[start + 8..]
            .split_whitespace()
            .next()
            .unwrap_or("unknown")
            .to_string(),
        None => "unknown".to_string(),
    }
}

/// Check if required dependencies are available
pub async fn check_dependencies(config: &Config) -> DependencyStatus {
    let yt_dlp_version = first_output_line(&config.ytdlp_command(), "--version").await;
    // ffmpeg is only needed for formats yt-dlp has to merge
    let ffmpeg_version = first_output_line("ffmpeg", "-version").await.map(|line| ffmpeg_version(&line));

    DependencyStatus {
        yt_dlp_available: yt_dlp_version.is_some(),
        yt_dlp_version,
        ffmpeg_available: ffmpeg_version.is_some(),
        ffmpeg_version,
    }
}

/// Print dependency check results to console
pub fn print_dependency_status(status: &DependencyStatus) {
    println!("Dependency check:");

    if status.yt_dlp_available {
        println!(
            "  yt-dlp: {} Available (v{})",
            style("✓").green(),
            status.yt_dlp_version.as_deref().unwrap_or("unknown")
        );
    } else {
        println!("  yt-dlp: {} Not found", style("✗").red());
        println!("    Install it with:  pip install yt-dlp");
        println!("    or see https://github.com/yt-dlp/yt-dlp#installation");
        println!("    or point the config at it:  {}", YTDLP_PATH_HINT);
    }

    if status.ffmpeg_available {
        println!(
            "  ffmpeg: {} Available (v{})",
            style("✓").green(),
            status.ffmpeg_version.as_deref().unwrap_or("unknown")
        );
    } else {
        println!(
            "  ffmpeg: {} Not found. Some videos may download without merged audio.",
            style("!").yellow()
        );
    }
}

/// yt-dlp is the only hard requirement
pub fn minimum_dependencies_available(status: &DependencyStatus) -> bool {
    status.yt_dlp_available
}
