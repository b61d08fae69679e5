//! Storage layer for crashlog.
//!
//! Crash records are plain files, one per incident, in one directory per
//! [`CrashKind`]. Records are written once and never modified.
//!
//! Every public operation here is best-effort: I/O failures are logged at
//! debug level and turned into "nothing there".
//!
//! There is no lock between writers and readers. Writes land in a hidden
//! temporary file that is renamed into place, and readers treat files that
//! vanish or cannot be read as absent.

pub mod wipe;

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::record::{CrashKind, RecordId};

pub use wipe::{wipe_app_storage, AppStorage};

/// Prefix of in-flight record files. Hidden names are never records.
pub(crate) const TEMP_PREFIX: &str = ".pending-";

/// Suffix of in-flight record files, appended after the record name.
pub(crate) const TEMP_SUFFIX: &str = ".tmp";

/// File-backed crash record store.
#[derive(Debug, Clone)]
pub struct CrashStore {
    /// Directory holding one partition per crash kind.
    root: PathBuf,
}

impl CrashStore {
    /// Create a store rooted at `root`.
    ///
    /// Nothing is created on disk until the first save.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory holding the partitions.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The partition directory for `kind`.
    #[must_use]
    pub fn partition_dir(&self, kind: CrashKind) -> PathBuf {
        self.root.join(kind.partition_name())
    }

    /// Create the partition directory for `kind` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn ensure_partition(&self, kind: CrashKind) -> Result<PathBuf> {
        let dir = self.partition_dir(kind);
        fs::create_dir_all(&dir).map_err(|source| Error::DirectoryCreate {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// Persist `body` as a new record of `kind`, stamped with the current
    /// second.
    ///
    /// Returns the record identifier, or `None` if the write failed. A record
    /// already written in the same second is replaced.
    pub fn save(&self, kind: CrashKind, body: &str) -> Option<RecordId> {
        self.save_at(kind, body, Utc::now())
    }

    /// Persist `body` as a record of `kind` stamped with `at`.
    pub fn save_at(&self, kind: CrashKind, body: &str, at: DateTime<Utc>) -> Option<RecordId> {
        let id = RecordId::for_time(at);
        match self.write_record(kind, &id, body) {
            Ok(()) => {
                debug!("Saved {} record {}", kind, id);
                Some(id)
            }
            Err(e) => {
                debug!("Dropping {} record {}: {}", kind, id, e);
                None
            }
        }
    }

    fn write_record(&self, kind: CrashKind, id: &RecordId, body: &str) -> Result<()> {
        let dir = self.ensure_partition(kind)?;
        let temp = dir.join(format!("{TEMP_PREFIX}{id}{TEMP_SUFFIX}"));

        let written = fs::File::create(&temp).and_then(|mut file| {
            file.write_all(body.as_bytes())?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&temp, dir.join(id.as_str()))) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Identifiers of every record of `kind`, in directory order.
    #[must_use]
    pub fn list(&self, kind: CrashKind) -> Vec<RecordId> {
        match self.try_list(kind) {
            Ok(ids) => ids,
            Err(e) => {
                if !e.is_not_found() {
                    debug!("Cannot list {} records: {}", kind, e);
                }
                Vec::new()
            }
        }
    }

    fn try_list(&self, kind: CrashKind) -> Result<Vec<RecordId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.partition_dir(kind))? {
            let Ok(entry) = entry else { continue };
            if let Some(id) = entry.file_name().to_str().and_then(RecordId::from_file_name) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Read one record. `None` if it is absent or unreadable.
    #[must_use]
    pub fn read(&self, kind: CrashKind, id: &RecordId) -> Option<String> {
        let path = self.record_path(kind, id).ok()?;
        match fs::read_to_string(&path) {
            Ok(body) => Some(body),
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    debug!("Skipping unreadable record {}: {}", path.display(), e);
                }
                None
            }
        }
    }

    /// Bodies of every readable record, signal records first.
    #[must_use]
    pub fn read_all(&self) -> Vec<String> {
        CrashKind::ALL
            .into_iter()
            .flat_map(|kind| {
                self.list(kind)
                    .into_iter()
                    .filter_map(move |id| self.read(kind, &id))
            })
            .collect()
    }

    /// Number of records across both partitions.
    #[must_use]
    pub fn count(&self) -> usize {
        CrashKind::ALL
            .into_iter()
            .map(|kind| self.list(kind).len())
            .sum()
    }

    /// Remove one record. Removing a missing record is a no-op.
    pub fn delete(&self, kind: CrashKind, id: &RecordId) {
        let Ok(path) = self.record_path(kind, id) else {
            return;
        };
        match fs::remove_file(&path) {
            Ok(()) => debug!("Deleted record {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => debug!("Cannot delete record {}: {}", path.display(), e),
        }
    }

    /// Remove every record of every kind, along with writes that were cut
    /// off before they could be renamed into place.
    pub fn delete_all(&self) {
        for kind in CrashKind::ALL {
            for id in self.list(kind) {
                self.delete(kind, &id);
            }
            self.remove_orphans(kind);
        }
    }

    fn remove_orphans(&self, kind: CrashKind) {
        let Ok(entries) = fs::read_dir(self.partition_dir(kind)) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let orphan = name
                .to_str()
                .is_some_and(|n| n.starts_with(TEMP_PREFIX) && n.ends_with(TEMP_SUFFIX));
            if orphan {
                if let Err(e) = fs::remove_file(entry.path()) {
                    debug!("Cannot remove {}: {}", entry.path().display(), e);
                }
            }
        }
    }

    /// Purge the whole store if any record is at least `max_age` old.
    ///
    /// Ages come from the stamps in the file names. One stale record wipes
    /// every record, fresh ones included, so nothing ever outlives the
    /// threshold once anything has reached it. Records whose names carry no
    /// parsable stamp never trigger a purge.
    ///
    /// Returns `true` if the store was purged.
    pub fn evict_if_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);

        let stale = CrashKind::ALL.into_iter().any(|kind| {
            self.list(kind).iter().any(|id| {
                id.timestamp()
                    .is_some_and(|stamp| (now - stamp).num_milliseconds() >= max_age_ms)
            })
        });

        if stale {
            info!(
                "Crash records older than {}ms found, purging {}",
                max_age_ms,
                self.root.display()
            );
            self.delete_all();
        }
        stale
    }

    fn record_path(&self, kind: CrashKind, id: &RecordId) -> Result<PathBuf> {
        // Ids built elsewhere (deserialized, say) are checked again here
        RecordId::from_file_name(id.as_str())
            .map(|id| self.partition_dir(kind).join(id.as_str()))
            .ok_or_else(|| Error::InvalidRecordId(id.to_string()))
    }
}
