//! Durable record of every discovered video and where it is in its
//! download lifecycle.
//!
//! The store is a CSV journal (`video_url,status,added_date`) in the target
//! directory. Each mutation appends one row and is synced before returning;
//! when an id appears more than once the last row wins. Superseded rows are
//! dropped by [`Ledger::compact`].

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const STATUS_FILE: &str = "download_status.csv";

const HEADER: [&str; 3] = ["video_url", "status", "added_date"];

/// Download lifecycle of a single video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Pending,
    Completed,
    Failed,
    Timeout,
    Error,
}

impl VideoStatus {
    /// Every status except `Pending` is a final outcome.
    pub fn is_terminal(self) -> bool {
        !matches!(self, VideoStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
            VideoStatus::Timeout => "timeout",
            VideoStatus::Error => "error",
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(VideoStatus::Pending),
            "completed" => Ok(VideoStatus::Completed),
            "failed" => Ok(VideoStatus::Failed),
            "timeout" => Ok(VideoStatus::Timeout),
            "error" => Ok(VideoStatus::Error),
            other => Err(Error::Parse(format!("unknown video status '{}'", other))),
        }
    }
}

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    #[serde(rename = "video_url")]
    pub id: String,
    pub status: VideoStatus,
    #[serde(rename = "added_date", with = "timestamp")]
    pub first_seen: DateTime<Local>,
}

/// Tally of ledger entries per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub timeout: usize,
    pub error: usize,
}

impl StatusCounts {
    /// Failed, timed out and errored videos together.
    pub fn failures(&self) -> usize {
        self.failed + self.timeout + self.error
    }

    pub fn total(&self) -> usize {
        self.pending + self.completed + self.failures()
    }

    fn add(&mut self, status: VideoStatus) {
        match status {
            VideoStatus::Pending => self.pending += 1,
            VideoStatus::Completed => self.completed += 1,
            VideoStatus::Failed => self.failed += 1,
            VideoStatus::Timeout => self.timeout += 1,
            VideoStatus::Error => self.error += 1,
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    records: HashMap<String, VideoRecord>,
    /// Ids in first-seen order.
    order: Vec<String>,
    /// Journal rows shadowed by a later row for the same id.
    superseded: usize,
}

impl LedgerState {
    fn apply(&mut self, record: VideoRecord) {
        match self.records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                self.superseded += 1;
            }
            None => {
                self.order.push(record.id.clone());
                self.records.insert(record.id.clone(), record);
            }
        }
    }
}

/// File-backed id → status map scoped to one target directory.
///
/// All reads and writes of the journal go through the ledger's own mutex, so
/// concurrent callers never interleave their read-modify-write cycles.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Opens (or creates) the ledger in `dir`.
    ///
    /// A damaged journal is moved aside to `download_status.csv.corrupt` and
    /// the ledger starts empty; videos are rediscovered by the next scrape.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(STATUS_FILE);

        let state = match read_journal(&path) {
            Ok(Some(state)) => state,
            Ok(None) => {
                write_journal(&path, &LedgerState::default())?;
                LedgerState::default()
            }
            Err(Error::CorruptState { path: bad, reason }) => {
                log::warn!("Status file {:?} is unreadable ({}), starting with an empty ledger", bad, reason);
                let aside = corrupt_path(&path);
                fs::rename(&path, &aside)?;
                log::warn!("Damaged status file kept at {:?}", aside);
                write_journal(&path, &LedgerState::default())?;
                LedgerState::default()
            }
            Err(e) => return Err(e),
        };

        let ledger = Self {
            path,
            state: Mutex::new(state),
        };
        ledger.compact()?;
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `id` as pending. Returns `false` if the id was already known,
    /// in which case nothing changes.
    pub fn record_if_new(&self, id: &str) -> Result<bool> {
        let mut state = self.lock();
        if state.records.contains_key(id) {
            return Ok(false);
        }

        let record = VideoRecord {
            id: id.to_string(),
            status: VideoStatus::Pending,
            first_seen: Local::now(),
        };
        append_row(&self.path, &record)?;
        state.apply(record);
        Ok(true)
    }

    /// Records a new status for `id`.
    ///
    /// A terminal status is never moved back to pending. Returns whether the
    /// stored status changed. Unknown ids are inserted.
    pub fn set_status(&self, id: &str, status: VideoStatus) -> Result<bool> {
        let mut state = self.lock();

        let record = match state.records.get(id) {
            Some(existing) if existing.status == status => return Ok(false),
            Some(existing) if existing.status.is_terminal() && !status.is_terminal() => {
                log::debug!("Ignoring {} -> {} for {}", existing.status, status, id);
                return Ok(false);
            }
            Some(existing) => VideoRecord {
                status,
                ..existing.clone()
            },
            None => VideoRecord {
                id: id.to_string(),
                status,
                first_seen: Local::now(),
            },
        };

        append_row(&self.path, &record)?;
        state.apply(record);
        Ok(true)
    }

    pub fn status(&self, id: &str) -> Option<VideoStatus> {
        self.lock().records.get(id).map(|r| r.status)
    }

    /// Current id → status view of the whole ledger.
    pub fn snapshot(&self) -> HashMap<String, VideoStatus> {
        self.lock()
            .records
            .iter()
            .map(|(id, record)| (id.clone(), record.status))
            .collect()
    }

    /// Pending ids in the order they were first discovered.
    pub fn pending(&self) -> Vec<String> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter(|id| {
                state
                    .records
                    .get(*id)
                    .is_some_and(|r| r.status == VideoStatus::Pending)
            })
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let state = self.lock();
        let mut counts = StatusCounts::default();
        for record in state.records.values() {
            counts.add(record.status);
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrites the journal with one row per id, if any rows are shadowed.
    pub fn compact(&self) -> Result<()> {
        let mut state = self.lock();
        if state.superseded == 0 {
            return Ok(());
        }
        write_journal(&self.path, &state)?;
        log::debug!("Compacted {:?}, dropped {} superseded rows", self.path, state.superseded);
        state.superseded = 0;
        Ok(())
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".corrupt");
    PathBuf::from(name)
}

/// Reads the journal. `Ok(None)` means there is no usable file yet.
///
/// A final row cut short by a crash mid-append (no trailing newline) is
/// dropped. A bad row anywhere else makes the file corrupt.
fn read_journal(path: &Path) -> Result<Option<LedgerState>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let unterminated = bytes.last().map_or(false, |b| *b != b'\n');

    let corrupt = |reason: String| Error::CorruptState {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes.as_slice());
    let headers = reader.headers().map_err(|e| corrupt(e.to_string()))?.clone();

    // A crash between create and the header write leaves an empty file
    if headers.is_empty() {
        return Ok(None);
    }
    if headers.iter().ne(HEADER.iter().copied()) {
        return Err(corrupt(format!("unexpected header {:?}", headers)));
    }

    let mut state = LedgerState::default();
    let mut rows = reader.deserialize::<VideoRecord>().peekable();
    while let Some(row) = rows.next() {
        let last = rows.peek().is_none();
        match row {
            Ok(record) => state.apply(record),
            Err(e) if unterminated && last => {
                log::warn!("Dropping incomplete last row of {:?}: {}", path, e);
            }
            Err(e) => return Err(corrupt(e.to_string())),
        }
    }
    Ok(Some(state))
}

fn append_row(path: &Path, record: &VideoRecord) -> Result<()> {
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    writer.serialize(record).map_err(io::Error::from)?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_data()?;
    Ok(())
}

/// Writes a header plus one row per id to a temp file, then renames it over
/// the journal.
fn write_journal(path: &Path, state: &LedgerState) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = File::create(&tmp)?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    writer.write_record(HEADER).map_err(io::Error::from)?;
    for id in &state.order {
        if let Some(record) = state.records.get(id) {
            writer.serialize(record).map_err(io::Error::from)?;
        }
    }
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

mod timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Local>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }

    /// Accepts RFC 3339 and the zone-less ISO form older status files used.
    pub fn parse(raw: &str) -> Option<DateTime<Local>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Local));
        }
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        Local.from_local_datetime(&naive).earliest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn data_rows(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join(STATUS_FILE))
            .unwrap()
            .lines()
            .skip(1)
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_record_if_new_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();

        assert!(ledger.record_if_new("https://thisvid.com/videos/a/").unwrap());
        assert!(!ledger.record_if_new("https://thisvid.com/videos/a/").unwrap());

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.status("https://thisvid.com/videos/a/"), Some(VideoStatus::Pending));
        assert_eq!(data_rows(dir.path()).len(), 1);
    }

    #[test]
    fn test_missing_store_creates_header() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        assert!(ledger.is_empty());

        let content = fs::read_to_string(dir.path().join(STATUS_FILE)).unwrap();
        assert_eq!(content.trim(), "video_url,status,added_date");
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let ledger = Ledger::open(dir.path()).unwrap();
            ledger.record_if_new("a").unwrap();
            ledger.record_if_new("b").unwrap();
            ledger.set_status("a", VideoStatus::Completed).unwrap();
        }

        let ledger = Ledger::open(dir.path()).unwrap();
        assert_eq!(ledger.status("a"), Some(VideoStatus::Completed));
        assert_eq!(ledger.status("b"), Some(VideoStatus::Pending));
        assert_eq!(ledger.pending(), vec!["b".to_string()]);
        // Reopen compacts the shadowed pending row for "a"
        assert_eq!(data_rows(dir.path()).len(), 2);
    }

    #[test]
    fn test_terminal_status_never_regresses() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        ledger.record_if_new("a").unwrap();

        assert!(ledger.set_status("a", VideoStatus::Completed).unwrap());
        assert!(!ledger.set_status("a", VideoStatus::Pending).unwrap());
        assert!(!ledger.record_if_new("a").unwrap());
        assert_eq!(ledger.status("a"), Some(VideoStatus::Completed));

        // A later outcome replaces an earlier one
        assert!(ledger.set_status("a", VideoStatus::Failed).unwrap());
        assert_eq!(ledger.status("a"), Some(VideoStatus::Failed));
    }

    #[test]
    fn test_corrupt_store_starts_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(STATUS_FILE), "video_url,status,added_date\nx,bogus,nope\n").unwrap();

        let ledger = Ledger::open(dir.path()).unwrap();
        assert!(ledger.is_empty());
        assert!(dir.path().join("download_status.csv.corrupt").exists());

        // The fresh store is usable
        assert!(ledger.record_if_new("x").unwrap());
    }

    #[test]
    fn test_torn_last_row_keeps_earlier_rows() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(STATUS_FILE),
            "video_url,status,added_date\n\
             https://thisvid.com/videos/a/,completed,2024-05-01T12:30:00\n\
             https://thisvid.com/videos/b/,failed,2024-05-01T12:31:00\n\
             https://thisvid.com/videos/c/,pend",
        )
        .unwrap();

        let ledger = Ledger::open(dir.path()).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.status("https://thisvid.com/videos/a/"), Some(VideoStatus::Completed));
        assert_eq!(ledger.status("https://thisvid.com/videos/b/"), Some(VideoStatus::Failed));
        assert!(!dir.path().join("download_status.csv.corrupt").exists());

        // Reopening rewrote the file without the torn row
        assert_eq!(data_rows(dir.path()).len(), 2);
        assert!(ledger.record_if_new("https://thisvid.com/videos/c/").unwrap());
    }

    #[test]
    fn test_bad_row_before_the_end_is_corrupt() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(STATUS_FILE),
            "video_url,status,added_date\n\
             https://thisvid.com/videos/a/,pend\n\
             https://thisvid.com/videos/b/,failed,2024-05-01T12:31:00",
        )
        .unwrap();

        let ledger = Ledger::open(dir.path()).unwrap();
        assert!(ledger.is_empty());
        assert!(dir.path().join("download_status.csv.corrupt").exists());
    }

    #[test]
    fn test_wrong_header_is_corrupt() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(STATUS_FILE), "url;state\nfoo;bar\n").unwrap();

        let ledger = Ledger::open(dir.path()).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_empty_file_is_treated_as_missing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(STATUS_FILE), "").unwrap();

        let ledger = Ledger::open(dir.path()).unwrap();
        assert!(ledger.is_empty());
        assert!(!dir.path().join("download_status.csv.corrupt").exists());
    }

    #[test]
    fn test_reads_zoneless_timestamps() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(STATUS_FILE),
            "video_url,status,added_date\nhttps://thisvid.com/videos/old/,completed,2024-05-01T12:30:00.123456\n",
        )
        .unwrap();

        let ledger = Ledger::open(dir.path()).unwrap();
        assert_eq!(ledger.status("https://thisvid.com/videos/old/"), Some(VideoStatus::Completed));
    }

    #[test]
    fn test_counts_group_failures() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        for id in ["a", "b", "c", "d", "e"] {
            ledger.record_if_new(id).unwrap();
        }
        ledger.set_status("a", VideoStatus::Completed).unwrap();
        ledger.set_status("b", VideoStatus::Failed).unwrap();
        ledger.set_status("c", VideoStatus::Timeout).unwrap();
        ledger.set_status("d", VideoStatus::Error).unwrap();

        let counts = ledger.counts();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failures(), 3);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn test_concurrent_writers_keep_store_consistent() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(Ledger::open(dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for n in 0..25 {
                        let id = format!("video-{}", n);
                        ledger.record_if_new(&id).unwrap();
                        if worker % 2 == 0 {
                            ledger.set_status(&id, VideoStatus::Completed).unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        drop(ledger);

        let reopened = Ledger::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 25);
        assert_eq!(reopened.counts().completed, 25);
        assert_eq!(data_rows(dir.path()).len(), 25);
    }
}
