mod config;
mod interactive;
mod run;
mod status;
mod update;

pub use config::config_command;
pub use interactive::interactive_command;
pub use run::{execute_job, resolve_start_page, resume_command, run_command, JobReport, PromptGate};
pub use status::status_command;
pub use update::update_command;

use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::site::Locator;
use crate::Result;

#[derive(Parser)]
#[command(name = "thisvid-ripper")]
#[command(version)]
#[command(about = "Scrape thisvid tag, profile and category listings and download every video with yt-dlp")]
pub struct Cli {
    /// Starts the interactive menu when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Menu-driven job setup
    Interactive,
    /// Scrape and download without prompts for the job description
    Run(RunArgs),
    /// Continue the job recorded in a download folder
    Resume {
        #[arg(short, long, help = "Folder holding session.json")]
        dir: PathBuf,

        #[arg(short, long, help = "Skip confirmation and batch prompts")]
        yes: bool,
    },
    /// Show what a download folder has tracked so far
    Status {
        #[arg(short, long)]
        dir: PathBuf,
    },
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
    /// Check the release feed for a newer version
    CheckUpdate,
}

#[derive(Args, Debug, Clone, Default)]
#[command(group(
    ArgGroup::new("target")
        .required(true)
        .args(["tag", "profile", "category", "url"])
))]
pub struct RunArgs {
    #[arg(long, help = "Tag slug, e.g. feet")]
    pub tag: Option<String>,

    #[arg(long, help = "Member id or name")]
    pub profile: Option<String>,

    #[arg(long, help = "Category slug, e.g. gay-newest")]
    pub category: Option<String>,

    #[arg(long, help = "Listing URL to recognise")]
    pub url: Option<String>,

    #[arg(short, long, conflicts_with = "detect", help = "Last page of the listing")]
    pub pages: Option<u32>,

    #[arg(long, help = "Detect the last page from the listing's pagination")]
    pub detect: bool,

    #[arg(short, long, help = "Start below the last page")]
    pub start: Option<u32>,

    #[arg(short, long, help = "Download folder")]
    pub dir: Option<PathBuf>,

    #[arg(short, long, help = "Concurrent downloads")]
    pub workers: Option<usize>,

    #[arg(short, long, help = "Videos per batch")]
    pub batch_size: Option<usize>,

    #[arg(short, long, help = "Skip confirmation and batch prompts")]
    pub yes: bool,
}

impl RunArgs {
    pub fn locator(&self) -> Result<Locator> {
        use crate::site::LocatorKind;

        match (&self.tag, &self.profile, &self.category, &self.url) {
            (Some(tag), ..) => Locator::new(LocatorKind::Tag, tag),
            (_, Some(profile), ..) => Locator::new(LocatorKind::Profile, profile),
            (_, _, Some(category), _) => Locator::new(LocatorKind::Category, category),
            (_, _, _, Some(url)) => Locator::from_url(url),
            _ => Err(crate::Error::Config(
                "one of --tag, --profile, --category or --url is required".into(),
            )),
        }
    }
}

#[derive(Subcommand)]
pub enum ConfigAction {
    Set {
        #[arg(short, long)]
        key: String,
        #[arg(short, long)]
        value: String,
    },
    Get {
        #[arg(short, long)]
        key: Option<String>,
    },
    Reset,
}
