use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Folder used when the operator accepts the default.
pub const DEFAULT_FOLDER: &str = "./thisvid_downloads";

/// Cleans a path typed or drag-and-dropped into a terminal.
///
/// Surrounding quotes are stripped, `\ ` becomes a space and a leading `~`
/// is expanded to the home directory.
pub fn clean_path_input(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(trimmed)
        .replace("\\ ", " ");

    if unquoted == "~" || unquoted.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(unquoted.trim_start_matches('~').trim_start_matches('/'));
        }
        log::warn!("Could not determine home directory, using {} as given", unquoted);
    }
    PathBuf::from(unquoted)
}

/// Creates `dir` (and parents) if needed; returns whether it was created.
pub fn ensure_target_dir(dir: &Path) -> Result<bool> {
    if dir.is_dir() {
        return Ok(false);
    }
    if dir.exists() {
        return Err(Error::Config(format!("{} exists and is not a folder", dir.display())));
    }
    fs::create_dir_all(dir)
        .map_err(|e| Error::Config(format!("cannot create folder {}: {}", dir.display(), e)))?;
    Ok(true)
}
