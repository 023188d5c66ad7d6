use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the output file name is laid out by the downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStyle {
    /// `<title> - [<id>].<ext>`
    Dash,
    /// `<title> [<id>].<ext>`
    Plain,
}

impl OutputStyle {
    pub fn template(self) -> &'static str {
        match self {
            OutputStyle::Dash => "%(title)s - [%(id)s].%(ext)s",
            OutputStyle::Plain => "%(title)s [%(id)s].%(ext)s",
        }
    }
}

impl std::str::FromStr for OutputStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dash" => Ok(OutputStyle::Dash),
            "plain" => Ok(OutputStyle::Plain),
            other => Err(format!("unknown output style '{}', use 'dash' or 'plain'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to yt-dlp executable, if not in PATH
    pub ytdlp_path: Option<PathBuf>,

    /// Default parent folder for new jobs
    pub download_dir: PathBuf,

    /// Site root used to build listing URLs
    pub base_url: String,

    pub user_agent: String,

    /// Per-request HTTP timeout in seconds
    pub request_timeout_secs: u64,

    /// Concurrent page fetches
    pub scrape_workers: usize,

    /// Pause after each page fetch, in milliseconds
    pub scrape_delay_ms: u64,

    /// Concurrent yt-dlp processes
    pub download_workers: usize,

    /// Hard limit for a single video download, in seconds
    pub download_timeout_secs: u64,

    /// Videos per batch before the continue prompt
    pub batch_size: usize,

    pub output_style: OutputStyle,

    /// Use the detected last page as the default start page
    pub auto_detect_pages: bool,

    /// Whether to show progress bars
    pub show_progress: bool,

    /// Release feed queried by `check-update`
    pub release_feed_url: String,
}

impl Config {
    fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thisvid-ripper")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load config from file or create default if not exists
    pub fn load() -> Self {
        let config_path = Self::config_path();

        if config_path.exists() {
            match fs::read_to_string(&config_path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => log::warn!("Failed to parse {:?}, using defaults: {}", config_path, e),
                },
                Err(e) => log::warn!("Failed to read {:?}, using defaults: {}", config_path, e),
            }
            // Never overwrite a file the user may want to fix by hand
            return Self::default();
        }

        let config = Self::default();
        if let Err(e) = config.save() {
            log::debug!("Could not write default config: {}", e);
        }
        config
    }

    /// Save config to file
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_dir = Self::config_dir();
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        fs::write(Self::config_path(), content)
    }

    /// Program used to fetch videos
    pub fn ytdlp_command(&self) -> String {
        match &self.ytdlp_path {
            Some(path) => path.to_string_lossy().into_owned(),
            None => "yt-dlp".to_string(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn scrape_delay(&self) -> Duration {
        Duration::from_millis(self.scrape_delay_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    #[must_use]
    pub fn with_scrape_workers(mut self, workers: usize) -> Self {
        self.scrape_workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_download_workers(mut self, workers: usize) -> Self {
        self.download_workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_scrape_delay(mut self, delay: Duration) -> Self {
        self.scrape_delay_ms = delay.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            download_dir: PathBuf::from("."),
            base_url: "https://thisvid.com".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            request_timeout_secs: 30,
            scrape_workers: 5,
            scrape_delay_ms: 500,
            download_workers: 4,
            download_timeout_secs: 600,
            batch_size: 50,
            output_style: OutputStyle::Dash,
            auto_detect_pages: true,
            show_progress: true,
            release_feed_url: "https://api.github.com/repos/sdc88/Sirs-ThisVid-Ripper/releases/latest"
                .to_string(),
        }
    }
}
