use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(default)]
    tag_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    UpToDate,
    Available { latest: String },
    /// The feed has no published release yet.
    NoReleases,
}

/// Asks the release feed for the latest version and compares it with ours.
pub async fn check_for_update(feed_url: &str, user_agent: &str) -> Result<UpdateStatus> {
    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(10))
        .build()?;
    let response = client.get(feed_url).send().await?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(UpdateStatus::NoReleases);
    }
    if !response.status().is_success() {
        return Err(Error::HttpStatus {
            url: feed_url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let body = response.text().await?;
    compare_release(&body, CURRENT_VERSION)
}

/// Reads `tag_name` out of a release document and compares it with `current`.
pub fn compare_release(body: &str, current: &str) -> Result<UpdateStatus> {
    let release: Release =
        serde_json::from_str(body).map_err(|e| Error::Parse(format!("release feed: {}", e)))?;
    let latest = release.tag_name.trim().trim_start_matches('v');
    if latest.is_empty() {
        return Err(Error::Parse("release feed has no tag_name".into()));
    }

    if is_newer(latest, current) {
        Ok(UpdateStatus::Available {
            latest: latest.to_string(),
        })
    } else {
        Ok(UpdateStatus::UpToDate)
    }
}

/// `1.10.0` → `[1, 10, 0]`; pre-release and build suffixes are ignored.
fn parse_version(version: &str) -> Option<Vec<u64>> {
    let core = version.trim_start_matches('v').split(['-', '+']).next()?;
    core.split('.').map(|part| part.parse().ok()).collect()
}

/// Whether `candidate` is a strictly higher version than `current`.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    match (parse_version(candidate), parse_version(current)) {
        (Some(mut a), Some(mut b)) => {
            let len = a.len().max(b.len());
            a.resize(len, 0);
            b.resize(len, 0);
            a > b
        }
        // Unparsable tags only count as new when they differ
        _ => candidate != current,
    }
}
