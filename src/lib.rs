mod error;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod ledger;
pub mod pages;
pub mod scrape;
pub mod session;
pub mod site;
pub mod utils;

pub use config::{Config, OutputStyle};
pub use dispatch::{BatchGate, DispatchSummary, Dispatcher, VideoFetcher, YtDlp};
pub use error::{Error, ErrorExt, Result};
pub use ledger::{Ledger, StatusCounts, VideoRecord, VideoStatus};
pub use pages::ScrapedPages;
pub use scrape::{ScrapeSummary, Scheduler};
pub use session::JobSession;
pub use site::{Enumerator, Locator, LocatorKind, PageCount};
