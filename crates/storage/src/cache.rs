use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cursus_core::model::{ProgressSnapshot, UserId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

use crate::repository::{PendingWrite, ProgressCache};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheInitError {
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Device-local snapshot cache backed by per-user JSON files.
///
/// Two files per user: `progress-<user>.json` holds the last known
/// snapshot, `pending-<user>.json` holds the one not-yet-confirmed remote
/// write. Pending-slot existence is file existence, so queued writes
/// survive process restarts.
///
/// The `ProgressCache` contract forbids surfacing errors, so every failure
/// here is logged and reported as absence (reads) or dropped (writes).
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Opens a cache directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `CacheInitError` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheInitError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, user: &UserId) -> PathBuf {
        self.dir.join(format!("progress-{user}.json"))
    }

    fn pending_path(&self, user: &UserId) -> PathBuf {
        self.dir.join(format!("pending-{user}.json"))
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cache read failed, treating as absent");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "malformed cache file, treating as absent");
                None
            }
        }
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cache encode failed, dropping write");
                return;
            }
        };
        // Write-then-rename so a crash mid-write cannot leave a torn file.
        let tmp = path.with_extension("json.tmp");
        let result = fs::write(&tmp, raw).and_then(|()| fs::rename(&tmp, path));
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "cache write failed, dropping write");
        }
    }

    fn remove_file(path: &Path) {
        if let Err(err) = fs::remove_file(path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "cache delete failed");
            }
        }
    }
}

impl ProgressCache for FileCache {
    fn read(&self, user: &UserId) -> Option<ProgressSnapshot> {
        Self::read_json::<ProgressSnapshot>(&self.snapshot_path(user))
            .map(ProgressSnapshot::normalized)
    }

    fn write(&self, user: &UserId, snapshot: &ProgressSnapshot) {
        Self::write_json(&self.snapshot_path(user), snapshot);
    }

    fn pending(&self, user: &UserId) -> Option<PendingWrite> {
        let pending: PendingWrite = Self::read_json(&self.pending_path(user))?;
        Some(PendingWrite {
            snapshot: pending.snapshot.normalized(),
            queued_at: pending.queued_at,
            last_attempt_at: pending.last_attempt_at,
            attempts: pending.attempts,
        })
    }

    fn set_pending(&self, user: &UserId, pending: PendingWrite) {
        Self::write_json(&self.pending_path(user), &pending);
    }

    fn clear_pending(&self, user: &UserId) {
        Self::remove_file(&self.pending_path(user));
    }

    fn pending_users(&self) -> Vec<UserId> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "cache scan failed");
                return Vec::new();
            }
        };
        let mut users = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name
                .strip_prefix("pending-")
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            if let Ok(user) = UserId::new(stem) {
                users.push(user);
            }
        }
        users.sort();
        users
    }
}

#[cfg(test)]
mod tests {
    use cursus_core::model::Year;
    use cursus_core::time::fixed_now;

    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let alice = user("alice");
        let snapshot = ProgressSnapshot::initial().with_year_unlocked(Year::new(2).unwrap());

        {
            let cache = FileCache::open(dir.path()).unwrap();
            cache.write(&alice, &snapshot);
        }
        let reopened = FileCache::open(dir.path()).unwrap();
        assert_eq!(reopened.read(&alice), Some(snapshot));
    }

    #[test]
    fn absent_user_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        assert_eq!(cache.read(&user("nobody")), None);
    }

    #[test]
    fn pending_slot_persists_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let alice = user("alice");
        let pending = PendingWrite::new(ProgressSnapshot::initial(), fixed_now());

        cache.set_pending(&alice, pending.clone());
        assert_eq!(cache.pending(&alice), Some(pending));
        assert_eq!(cache.pending_users(), vec![alice.clone()]);

        cache.clear_pending(&alice);
        assert_eq!(cache.pending(&alice), None);
        assert!(cache.pending_users().is_empty());
        // Clearing twice is harmless.
        cache.clear_pending(&alice);
    }

    #[test]
    fn pending_users_lists_only_pending_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let alice = user("alice");
        let bob = user("bob");

        cache.write(&alice, &ProgressSnapshot::initial());
        cache.set_pending(&bob, PendingWrite::new(ProgressSnapshot::initial(), fixed_now()));
        cache.set_pending(&alice, PendingWrite::new(ProgressSnapshot::initial(), fixed_now()));

        assert_eq!(cache.pending_users(), vec![alice, bob]);
    }

    #[test]
    fn corrupt_files_read_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let alice = user("alice");

        fs::write(dir.path().join("progress-alice.json"), b"{ not json").unwrap();
        fs::write(dir.path().join("pending-alice.json"), b"[]").unwrap();
        assert_eq!(cache.read(&alice), None);
        assert_eq!(cache.pending(&alice), None);
    }

    #[test]
    fn rewrites_replace_the_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let alice = user("alice");

        cache.write(&alice, &ProgressSnapshot::initial());
        let newer = ProgressSnapshot::initial().with_year_unlocked(Year::new(3).unwrap());
        cache.write(&alice, &newer);
        assert_eq!(cache.read(&alice), Some(newer));
    }
}
