//! Set of listing pages already enumerated for one locator's job in a
//! target directory, persisted as newline-delimited page numbers.
//!
//! Each locator gets its own file, so jobs sharing a folder never see each
//! other's pages. The file is removed once its job completes.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::site::Locator;
use crate::Result;

const PAGES_FILE_PREFIX: &str = "scraped_pages";

/// `scraped_pages-tag-feet.txt` for `Locator::Tag("feet")`.
pub fn pages_file_name(locator: &Locator) -> String {
    format!("{}-{}.txt", PAGES_FILE_PREFIX, locator.folder_name())
}

#[derive(Debug)]
pub struct ScrapedPages {
    path: PathBuf,
    pages: Mutex<BTreeSet<u32>>,
}

impl ScrapedPages {
    /// Loads `locator`'s page set from `dir`. Lines that are not page
    /// numbers are skipped with a warning; a missing file is an empty set.
    pub fn open(dir: &Path, locator: &Locator) -> Result<Self> {
        let path = dir.join(pages_file_name(locator));
        let pages = match fs::read_to_string(&path) {
            Ok(content) => parse_pages(&content, &path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                log::warn!("Could not read {:?} ({}), rescraping every page", path, e);
                BTreeSet::new()
            }
        };

        Ok(Self {
            path,
            pages: Mutex::new(pages),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<u32>> {
        self.pages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, page: u32) -> bool {
        self.lock().contains(&page)
    }

    /// Marks `page` as fully enumerated. The line is synced to disk before
    /// the page is considered done.
    pub fn mark_done(&self, page: u32) -> Result<()> {
        let mut pages = self.lock();
        if pages.contains(&page) {
            return Ok(());
        }

        let mut file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        writeln!(file, "{}", page)?;
        file.sync_data()?;

        pages.insert(page);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forgets every page and removes the file.
    pub fn clear(&self) -> Result<()> {
        let mut pages = self.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        pages.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pages of `start..=end` (walked downwards) that still need a fetch.
    pub fn remaining(&self, start: u32, end: u32) -> Vec<u32> {
        let pages = self.lock();
        (end..=start).rev().filter(|p| !pages.contains(p)).collect()
    }
}

fn parse_pages(content: &str, path: &Path) -> BTreeSet<u32> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match line.parse::<u32>() {
            Ok(page) => Some(page),
            Err(_) => {
                log::warn!("Ignoring malformed line {:?} in {:?}", line, path);
                None
            }
        })
        .collect()
}
