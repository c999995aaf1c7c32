//! Persisted guide store
//!
//! A durable table of program records keyed by `(channel, stop)`, held as a
//! `BTreeMap` and persisted as a JSON snapshot under a per-user cache
//! directory. Flushes are journaled: a marker file is created before the
//! write and removed after the atomic rename, so a marker left behind by an
//! interrupted session flags the store as dirty and forces a full reload on
//! the next startup.

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

use crate::timestamp::{GuideTime, RetentionWindow};

/// Backing snapshot file name
pub const STORE_FILE: &str = "programs.json";

/// Journal marker file name; present only during (or after an interrupted) flush
pub const JOURNAL_FILE: &str = "programs.journal";

/// One stored program: the unit of storage
///
/// `(channel, stop)` is unique; records are created by a decode pass, never
/// updated in place, and deleted only by retention eviction or a full reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramRecord {
    /// Opaque channel identifier, matched to the external channel catalog by convention
    pub channel: String,
    /// Airtime start
    pub start: GuideTime,
    /// Airtime stop, derived from the next schedule mark
    pub stop: GuideTime,
    /// Free-text title/synopsis
    pub description: String,
}

/// Primary key of the program table
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ProgramKey {
    channel: String,
    stop: GuideTime,
}

impl ProgramRecord {
    fn key(&self) -> ProgramKey {
        ProgramKey {
            channel: self.channel.clone(),
            stop: self.stop,
        }
    }
}

/// Errors raised by store lifecycle operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure while reading or writing the backing file
    #[error("store I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// No per-user cache directory could be determined
    #[error("cache directory could not be determined")]
    NoCacheDir,
}

/// The persisted program table
///
/// One handle per engine: opened once at construction, closed once at
/// teardown. Readers take the lock only long enough to copy matching rows,
/// so queries are never blocked by an in-flight refresh pipeline — only the
/// merge commit itself holds the write lock.
pub struct GuideStore {
    db_path: PathBuf,
    journal_path: PathBuf,
    programs: RwLock<BTreeMap<ProgramKey, ProgramRecord>>,
    uninitialized: bool,
    dirty: bool,
}

/// Per-user cache directory for the default store placement
pub fn default_cache_dir() -> Result<PathBuf, StoreError> {
    ProjectDirs::from("", "", "teleguide")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .ok_or(StoreError::NoCacheDir)
}

/// Best-effort removal of whatever occupies a backing path
///
/// Recovery must never turn into a hard failure: even a directory squatting
/// on the snapshot path gets cleared so the store can recreate itself.
fn discard_backing(path: &Path) {
    if fs::remove_file(path).is_ok() {
        return;
    }
    if let Err(err) = fs::remove_dir_all(path) {
        warn!("could not discard {}: {}", path.display(), err);
    }
}

impl GuideStore {
    /// Opens (or creates) the store under `dir`
    ///
    /// The directory is created if absent. An absent or zero-size backing
    /// file marks the store as uninitialized (first-run bootstrap signal).
    /// A backing file that no longer parses is deleted and recreated empty —
    /// data-loss-accepting recovery, never a permanent failure.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let db_path = dir.join(STORE_FILE);
        let journal_path = dir.join(JOURNAL_FILE);
        let dirty = journal_path.exists();
        if dirty {
            warn!(
                "leftover journal at {}: previous write was interrupted",
                journal_path.display()
            );
        }

        let mut uninitialized = false;
        let programs = match fs::metadata(&db_path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => match Self::load(&db_path) {
                Ok(map) => map,
                Err(err) => {
                    warn!(
                        "store at {} is corrupt ({}), recreating empty",
                        db_path.display(),
                        err
                    );
                    discard_backing(&db_path);
                    uninitialized = true;
                    BTreeMap::new()
                }
            },
            Ok(meta) if !meta.is_file() => {
                warn!(
                    "store path {} is not a regular file, recreating empty",
                    db_path.display()
                );
                discard_backing(&db_path);
                uninitialized = true;
                BTreeMap::new()
            }
            _ => {
                uninitialized = true;
                BTreeMap::new()
            }
        };

        info!(
            "opened store at {} ({} records)",
            db_path.display(),
            programs.len()
        );
        Ok(GuideStore {
            db_path,
            journal_path,
            programs: RwLock::new(programs),
            uninitialized,
            dirty,
        })
    }

    fn load(path: &Path) -> Result<BTreeMap<ProgramKey, ProgramRecord>, std::io::Error> {
        let content = fs::read_to_string(path)?;
        let records: Vec<ProgramRecord> = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(records.into_iter().map(|r| (r.key(), r)).collect())
    }

    /// True when the backing file was absent or zero-size at open
    pub fn was_uninitialized(&self) -> bool {
        self.uninitialized
    }

    /// True when a journal left by an interrupted prior write was found at open
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    /// True when no records are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every record; the corrective step before a forced full reload
    pub fn reset(&self) {
        let mut map = self.write_lock();
        let dropped = map.len();
        map.clear();
        if dropped > 0 {
            info!("reset store, dropped {} records", dropped);
        }
    }

    /// Deletes records whose `start` falls before the retention window
    ///
    /// Only the trailing edge of history is trimmed; today-and-later records
    /// are never touched. Returns the number of evicted records.
    pub fn evict_outside_retention(&self, window: &RetentionWindow) -> usize {
        let mut map = self.write_lock();
        let before = map.len();
        map.retain(|_, record| record.start >= window.lower);
        let evicted = before - map.len();
        if evicted > 0 {
            debug!("evicted {} records older than {}", evicted, window.lower);
        }
        evicted
    }

    /// Bulk-inserts decoded records, skipping stale history and duplicates
    ///
    /// Records with `start < only_from` are ignored (guards against
    /// re-inserting evicted history on every load); a duplicate
    /// `(channel, stop)` key is swallowed, not surfaced. Returns the number
    /// of records actually inserted.
    pub fn merge_insert(&self, records: Vec<ProgramRecord>, only_from: GuideTime) -> usize {
        let mut map = self.write_lock();
        let mut inserted = 0;
        for record in records {
            if record.start < only_from {
                continue;
            }
            if let Entry::Vacant(slot) = map.entry(record.key()) {
                slot.insert(record);
                inserted += 1;
            }
        }
        inserted
    }

    /// Persists the current table with a journaled atomic-rename write
    ///
    /// The journal marker goes down first and is removed only after the
    /// rename lands, so an interruption anywhere in between leaves the
    /// marker behind for the next startup to find. On a failed write the
    /// suspect backing file is removed rather than repaired.
    pub fn flush(&self) -> Result<(), StoreError> {
        fs::write(&self.journal_path, b"")?;

        let snapshot: Vec<ProgramRecord> = self.read_lock().values().cloned().collect();
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let tmp_path = self.db_path.with_extension("json.tmp");
        if let Err(err) = fs::write(&tmp_path, json).and_then(|_| fs::rename(&tmp_path, &self.db_path))
        {
            warn!("store flush failed ({}), dropping backing file", err);
            discard_backing(&self.db_path);
            return Err(err.into());
        }

        fs::remove_file(&self.journal_path)?;
        debug!("flushed {} records to {}", snapshot.len(), self.db_path.display());
        Ok(())
    }

    /// All programs on one channel, in `stop` order (primary-key order)
    pub fn channel_programs(&self, channel: &str) -> Vec<ProgramRecord> {
        let from = ProgramKey {
            channel: channel.to_string(),
            stop: GuideTime::MIN,
        };
        let to = ProgramKey {
            channel: channel.to_string(),
            stop: GuideTime::MAX,
        };
        self.read_lock()
            .range(from..=to)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Snapshot of every stored program, in `(channel, stop)` order
    pub fn all_programs(&self) -> Vec<ProgramRecord> {
        self.read_lock().values().cloned().collect()
    }

    /// Releases the store handle
    ///
    /// All committed state is already on disk after the last flush; this
    /// exists so the engine's lifecycle has an explicit teardown point.
    pub fn close(self) {
        debug!("closing store at {}", self.db_path.display());
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<ProgramKey, ProgramRecord>> {
        self.programs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<ProgramKey, ProgramRecord>> {
        self.programs.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn record(channel: &str, start: u64, stop: u64, desc: &str) -> ProgramRecord {
        ProgramRecord {
            channel: channel.to_string(),
            start: GuideTime::from_raw(start),
            stop: GuideTime::from_raw(stop),
            description: desc.to_string(),
        }
    }

    fn open_temp() -> (GuideStore, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let store = GuideStore::open(dir.path()).expect("open store");
        (store, dir)
    }

    #[test]
    fn test_open_fresh_store_is_uninitialized() {
        let (store, _dir) = open_temp();
        assert!(store.was_uninitialized());
        assert!(!store.is_dirty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_open_creates_missing_directory() {
        let dir = TempDir::new().expect("temp dir");
        let nested = dir.path().join("cache").join("guide");
        let store = GuideStore::open(&nested).expect("open store");
        assert!(nested.exists());
        assert!(store.was_uninitialized());
    }

    #[test]
    fn test_merge_insert_is_idempotent() {
        let (store, _dir) = open_temp();
        let batch = vec![
            record("chan1", 20240115100000, 20240115110000, "A"),
            record("chan1", 20240115110000, 20240115120000, "B"),
        ];

        let first = store.merge_insert(batch.clone(), GuideTime::MIN);
        let second = store.merge_insert(batch, GuideTime::MIN);

        assert_eq!(first, 2);
        assert_eq!(second, 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_merge_insert_respects_only_from() {
        let (store, _dir) = open_temp();
        let batch = vec![
            record("chan1", 20240101100000, 20240101110000, "stale"),
            record("chan1", 20240115100000, 20240115110000, "fresh"),
        ];

        let inserted = store.merge_insert(batch, GuideTime::from_raw(20240110000000));
        assert_eq!(inserted, 1);
        assert_eq!(store.channel_programs("chan1")[0].description, "fresh");
    }

    #[test]
    fn test_retention_eviction() {
        let (store, _dir) = open_temp();
        store.merge_insert(
            vec![
                record("chan1", 20240105100000, 20240105110000, "10 days ago"),
                record("chan1", 20240114100000, 20240114110000, "yesterday"),
                record("chan1", 20240115100000, 20240115110000, "today"),
                record("chan1", 20240120100000, 20240120110000, "future"),
            ],
            GuideTime::MIN,
        );

        let today = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let window = RetentionWindow::compute(today, 5);
        let evicted = store.evict_outside_retention(&window);

        assert_eq!(evicted, 1);
        let remaining: Vec<String> = store
            .channel_programs("chan1")
            .into_iter()
            .map(|r| r.description)
            .collect();
        assert_eq!(remaining, vec!["yesterday", "today", "future"]);
    }

    #[test]
    fn test_flush_and_reopen() {
        let dir = TempDir::new().expect("temp dir");
        {
            let store = GuideStore::open(dir.path()).expect("open");
            store.merge_insert(
                vec![record("chan1", 20240115100000, 20240115110000, "A")],
                GuideTime::MIN,
            );
            store.flush().expect("flush");
            store.close();
        }

        let reopened = GuideStore::open(dir.path()).expect("reopen");
        assert!(!reopened.was_uninitialized());
        assert!(!reopened.is_dirty());
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.channel_programs("chan1")[0].description, "A");
    }

    #[test]
    fn test_leftover_journal_marks_dirty() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join(JOURNAL_FILE), b"").expect("write journal");

        let store = GuideStore::open(dir.path()).expect("open");
        assert!(store.is_dirty());
    }

    #[test]
    fn test_flush_clears_journal() {
        let (store, dir) = open_temp();
        store.flush().expect("flush");
        assert!(!dir.path().join(JOURNAL_FILE).exists());
        assert!(dir.path().join(STORE_FILE).exists());
    }

    #[test]
    fn test_corrupt_backing_file_recreated_empty() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join(STORE_FILE), b"{not json at all").expect("write");

        let store = GuideStore::open(dir.path()).expect("open");
        assert!(store.was_uninitialized());
        assert!(store.is_empty());
        assert!(!dir.path().join(STORE_FILE).exists());
    }

    #[test]
    fn test_directory_at_backing_path_recovered() {
        let dir = TempDir::new().expect("temp dir");
        fs::create_dir(dir.path().join(STORE_FILE)).expect("create dir");

        let store = GuideStore::open(dir.path()).expect("open must recover");
        assert!(store.was_uninitialized());
        store.merge_insert(
            vec![record("chan1", 20240115100000, 20240115110000, "A")],
            GuideTime::MIN,
        );
        store.flush().expect("flush after recovery");
        store.close();

        let reopened = GuideStore::open(dir.path()).expect("reopen");
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_failed_flush_leaves_dirty_and_reopen_recovers() {
        let dir = TempDir::new().expect("temp dir");
        let store = GuideStore::open(dir.path()).expect("open");
        store.merge_insert(
            vec![record("chan1", 20240115100000, 20240115110000, "A")],
            GuideTime::MIN,
        );

        // A directory landing on the backing path makes the rename fail.
        fs::create_dir(dir.path().join(STORE_FILE)).expect("create dir");
        assert!(store.flush().is_err());
        assert!(
            dir.path().join(JOURNAL_FILE).exists(),
            "journal must stay behind after a failed flush"
        );
        store.close();

        let reopened = GuideStore::open(dir.path()).expect("reopen must succeed");
        assert!(reopened.is_dirty());
        reopened.merge_insert(
            vec![record("chan1", 20240115100000, 20240115110000, "A")],
            GuideTime::MIN,
        );
        reopened.flush().expect("flush after recovery");
    }

    #[test]
    fn test_channel_programs_are_key_ordered() {
        let (store, _dir) = open_temp();
        store.merge_insert(
            vec![
                record("chan1", 20240115120000, 20240115130000, "C"),
                record("chan1", 20240115100000, 20240115110000, "A"),
                record("chan2", 20240115100000, 20240115110000, "other"),
                record("chan1", 20240115110000, 20240115120000, "B"),
            ],
            GuideTime::MIN,
        );

        let titles: Vec<String> = store
            .channel_programs("chan1")
            .into_iter()
            .map(|r| r.description)
            .collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_reset_drops_everything() {
        let (store, _dir) = open_temp();
        store.merge_insert(
            vec![record("chan1", 20240115100000, 20240115110000, "A")],
            GuideTime::MIN,
        );
        store.reset();
        assert!(store.is_empty());
    }
}
