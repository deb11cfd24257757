//! In-memory map of files scheduled for deletion.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a single sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Files removed from disk
    pub deleted: Vec<PathBuf>,
    /// Registered files that were already gone
    pub missing: Vec<PathBuf>,
    /// Files whose removal failed; their entries are dropped anyway
    pub failed: Vec<PathBuf>,
}

impl SweepReport {
    /// Number of registry entries this sweep consumed
    pub fn total(&self) -> usize {
        self.deleted.len() + self.missing.len() + self.failed.len()
    }
}

/// Pathname → expiry map shared by request handlers and the sweeper.
///
/// Cloning yields another handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct AutoDeleteRegistry {
    entries: Arc<Mutex<HashMap<PathBuf, DateTime<Utc>>>>,
}

impl AutoDeleteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A handler that panicked while holding the lock cannot leave the map
    // half-updated, so a poisoned lock is still usable.
    pub(super) fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, DateTime<Utc>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Schedule `path` for deletion `ttl` from now.
    ///
    /// Re-registering a path replaces its previous expiry.
    pub fn register(&self, path: impl Into<PathBuf>, ttl: Duration) -> DateTime<Utc> {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        let expires = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.register_at(path, expires);
        expires
    }

    /// Schedule `path` for deletion at an absolute time.
    pub fn register_at(&self, path: impl Into<PathBuf>, expires: DateTime<Utc>) {
        let path = path.into();
        debug!(path = %path.display(), %expires, "registered for auto-delete");
        self.lock().insert(path, expires);
    }

    pub fn expiry(&self, path: &Path) -> Option<DateTime<Utc>> {
        self.lock().get(path).copied()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Delete every file whose expiry is at or before `now`, or every
    /// registered file when `force` is set.
    ///
    /// Due entries leave the registry whether or not their deletion worked,
    /// so an unremovable path is not retried forever.
    pub fn sweep(&self, now: DateTime<Utc>, force: bool) -> SweepReport {
        let due: Vec<PathBuf> = {
            let mut entries = self.lock();
            let due: Vec<PathBuf> = entries
                .iter()
                .filter(|(_, expires)| force || **expires <= now)
                .map(|(path, _)| path.clone())
                .collect();
            for path in &due {
                entries.remove(path);
            }
            due
        };

        let mut report = SweepReport::default();
        for path in due {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "auto-deleted");
                    report.deleted.push(path);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "auto-delete: file already gone");
                    report.missing.push(path);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "auto-delete failed");
                    report.failed.push(path);
                }
            }
        }
        report
    }
}
