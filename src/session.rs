//! The active job's parameters, kept in the target directory so an
//! interrupted run can be picked up again.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::site::Locator;
use crate::{Error, Result};

pub const SESSION_FILE: &str = "session.json";

/// Everything needed to restart a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSession {
    pub id: Uuid,
    pub locator: Locator,
    pub start_page: u32,
    pub end_page: u32,
    pub target_directory: PathBuf,
    pub created_at: DateTime<Local>,
}

impl JobSession {
    /// Creates a session walking `start_page` down to page 1.
    pub fn new(locator: Locator, start_page: u32, target_directory: PathBuf) -> Result<Self> {
        if start_page < 1 {
            return Err(Error::Config("start page must be at least 1".into()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            locator,
            start_page,
            end_page: 1,
            target_directory,
            created_at: Local::now(),
        })
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(SESSION_FILE)
    }
}

/// Writes the session atomically (temp file + rename) into its target directory.
pub fn save(job: &JobSession) -> Result<()> {
    let path = JobSession::path(&job.target_directory);
    let tmp_path = path.with_extension("json.tmp");

    let json = serde_json::to_string_pretty(job).map_err(|e| Error::Parse(e.to_string()))?;
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, &path)?;
    log::debug!("Saved session {} to {:?}", job.id, path);
    Ok(())
}

/// Reads the session in `dir`. A missing or unparsable file is `None`.
pub fn load(dir: &Path) -> Option<JobSession> {
    let path = JobSession::path(dir);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            log::warn!("Could not read session file {:?}: {}", path, e);
            return None;
        }
    };

    match serde_json::from_str::<JobSession>(&content) {
        Ok(job) if job.start_page >= job.end_page && job.end_page >= 1 => Some(job),
        Ok(job) => {
            log::warn!(
                "Ignoring session {:?} with invalid page range {} -> {}",
                path,
                job.start_page,
                job.end_page
            );
            None
        }
        Err(e) => {
            log::warn!("Ignoring corrupt session file {:?}: {}", path, e);
            None
        }
    }
}

/// Removes the session file in `dir`, if any.
pub fn clear(dir: &Path) -> Result<()> {
    match fs::remove_file(JobSession::path(dir)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
