use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Download failed for {id}: {reason}")]
    DownloadFailed { id: String, reason: String },

    #[error("Download of {id} exceeded {}s", .limit.as_secs())]
    DownloadTimeout { id: String, limit: Duration },

    #[error("Corrupt state file {path:?}: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Command '{command}' failed: {reason}")]
    CommandExecution { command: String, reason: String },

    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether this error is a per-page network failure that should only
    /// skip the page rather than end the job.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_) | Error::HttpStatus { .. })
    }
}

pub trait ErrorExt {
    fn context<C>(self, context: C) -> Self
    where
        C: std::fmt::Display + Send + Sync + 'static;
}

impl ErrorExt for Error {
    fn context<C>(self, context: C) -> Self
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        match self {
            Error::Other(err) => Error::Other(err.context(context)),
            err => Error::Other(anyhow::Error::new(err).context(context)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
