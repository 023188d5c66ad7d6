use std::path::PathBuf;
use std::str::FromStr;

use super::ConfigAction;
use crate::config::OutputStyle;
use crate::{Config, Error, Result};

const KEYS: &[&str] = &[
    "ytdlp_path",
    "download_dir",
    "base_url",
    "user_agent",
    "request_timeout_secs",
    "scrape_workers",
    "scrape_delay_ms",
    "download_workers",
    "download_timeout_secs",
    "batch_size",
    "output_style",
    "auto_detect_pages",
    "show_progress",
    "release_feed_url",
];

/// Rendered value of `key`, or `None` for an unknown key.
fn get_key(config: &Config, key: &str) -> Option<String> {
    let value = match key {
        "ytdlp_path" => match &config.ytdlp_path {
            Some(path) => format!("{:?}", path),
            None => "Using system PATH".to_string(),
        },
        "download_dir" => format!("{:?}", config.download_dir),
        "base_url" => config.base_url.clone(),
        "user_agent" => config.user_agent.clone(),
        "request_timeout_secs" => config.request_timeout_secs.to_string(),
        "scrape_workers" => config.scrape_workers.to_string(),
        "scrape_delay_ms" => config.scrape_delay_ms.to_string(),
        "download_workers" => config.download_workers.to_string(),
        "download_timeout_secs" => config.download_timeout_secs.to_string(),
        "batch_size" => config.batch_size.to_string(),
        "output_style" => format!("{:?}", config.output_style).to_lowercase(),
        "auto_detect_pages" => config.auto_detect_pages.to_string(),
        "show_progress" => config.show_progress.to_string(),
        "release_feed_url" => config.release_feed_url.clone(),
        _ => return None,
    };
    Some(value)
}

fn parse<T: FromStr>(key: &str, value: &str, hint: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {}: '{}' ({})", key, value, hint)))
}

fn positive(key: &str, value: &str) -> Result<usize> {
    match parse::<usize>(key, value, "a whole number of at least 1")? {
        0 => Err(Error::Config(format!("{} must be at least 1", key))),
        n => Ok(n),
    }
}

/// Applies `key = value` to `config`.
fn set_key(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "ytdlp_path" => {
            config.ytdlp_path = if value.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(PathBuf::from(value))
            }
        }
        "download_dir" => config.download_dir = PathBuf::from(value),
        "base_url" => {
            url::Url::parse(value).map_err(|e| Error::Config(format!("invalid base_url '{}': {}", value, e)))?;
            config.base_url = value.trim_end_matches('/').to_string();
        }
        "user_agent" => config.user_agent = value.to_string(),
        "request_timeout_secs" => config.request_timeout_secs = parse(key, value, "seconds")?,
        "scrape_workers" => config.scrape_workers = positive(key, value)?,
        "scrape_delay_ms" => config.scrape_delay_ms = parse(key, value, "milliseconds")?,
        "download_workers" => config.download_workers = positive(key, value)?,
        "download_timeout_secs" => config.download_timeout_secs = parse(key, value, "seconds")?,
        "batch_size" => config.batch_size = positive(key, value)?,
        "output_style" => config.output_style = OutputStyle::from_str(value).map_err(Error::Config)?,
        "auto_detect_pages" => config.auto_detect_pages = parse(key, value, "true or false")?,
        "show_progress" => config.show_progress = parse(key, value, "true or false")?,
        "release_feed_url" => config.release_feed_url = value.to_string(),
        _ => {
            return Err(Error::Config(format!(
                "unknown configuration key '{}'. Available keys: {}",
                key,
                KEYS.join(", ")
            )))
        }
    }
    Ok(())
}

/// Handles the config command execution
pub async fn config_command(action: Option<ConfigAction>) -> Result<()> {
    let mut config = Config::load();

    match action {
        Some(ConfigAction::Get { key: Some(key) }) => match get_key(&config, &key) {
            Some(value) => println!("{}: {}", key, value),
            None => println!("Unknown configuration key: {}", key),
        },
        Some(ConfigAction::Get { key: None }) => {
            println!("Current configuration ({}):", Config::config_path().display());
            for key in KEYS {
                if let Some(value) = get_key(&config, key) {
                    println!("  {}: {}", key, value);
                }
            }
        }
        Some(ConfigAction::Set { key, value }) => {
            set_key(&mut config, &key, &value)?;
            println!("Updated {} to {}", key, get_key(&config, &key).unwrap_or_default());
            config.save()?;
            println!("Configuration saved successfully");
        }
        Some(ConfigAction::Reset) => {
            config = Config::default();
            config.save()?;
            println!("Configuration reset to defaults");
        }
        None => {
            println!("Config command usage:");
            println!("  thisvid-ripper config get [--key KEY]          - Show all config or a specific value");
            println!("  thisvid-ripper config set --key KEY --value V  - Set a config value");
            println!("  thisvid-ripper config reset                    - Reset configuration to defaults");
            println!("\nAvailable config keys:");
            for key in KEYS {
                println!("  {}", key);
            }
        }
    }

    Ok(())
}
