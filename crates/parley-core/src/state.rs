//! Whole-store snapshot persistence.

use crate::error::PersistenceError;
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::Mutex;
use parley_protocol::Session;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized copy of every session in the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemorySnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub sessions: Vec<Session>,
}

impl MemorySnapshot {
    pub fn new(sessions: Vec<Session>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            sessions,
        }
    }

    /// Reject snapshots that could not have come from a consistent store.
    pub fn validate(&self) -> Result<(), PersistenceError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion(self.version));
        }
        let mut seen = HashSet::with_capacity(self.sessions.len());
        for session in &self.sessions {
            if !seen.insert(session.id) {
                return Err(PersistenceError::Corrupt(format!(
                    "duplicate session id {}",
                    session.id
                )));
            }
        }
        Ok(())
    }

    pub fn message_count(&self) -> usize {
        self.sessions
            .iter()
            .map(|session| session.messages.len())
            .sum()
    }
}

/// Durable storage for session snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Load the latest snapshot. `Ok(None)` means nothing was ever saved.
    fn load(&self) -> Result<Option<MemorySnapshot>, PersistenceError>;
    /// Overwrite the stored snapshot as a whole.
    fn save(&self, snapshot: &MemorySnapshot) -> Result<(), PersistenceError>;
    /// Human-readable location for stats output.
    fn location(&self) -> String;
}

/// JSON snapshot file replaced atomically on every save.
pub struct FileSnapshotStore {
    path: PathBuf,
    /// Serialize writers of the temp file.
    write_lock: Mutex<()>,
}

impl FileSnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<MemorySnapshot>, PersistenceError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no snapshot on disk (path={})", self.path.display());
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let snapshot: MemorySnapshot = serde_json::from_str(&contents)?;
        snapshot.validate()?;
        info!(
            "loaded snapshot (path={}, sessions={}, saved_at={})",
            self.path.display(),
            snapshot.sessions.len(),
            snapshot.saved_at
        );
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &MemorySnapshot) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let temp = self.temp_path();
        let body = serde_json::to_vec_pretty(snapshot)?;
        let mut file = File::create(&temp)?;
        file.write_all(&body)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, &self.path)?;
        debug!(
            "wrote snapshot (path={}, sessions={}, bytes={})",
            self.path.display(),
            snapshot.sessions.len(),
            body.len()
        );
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{FileSnapshotStore, MemorySnapshot, SnapshotStore};
    use crate::error::PersistenceError;
    use parley_protocol::{Message, Session};
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn sample_session(title: &str) -> Session {
        let mut session = Session::new(Uuid::new_v4(), title);
        session.messages.push(Message::user("hello"));
        session.messages.push(Message::assistant("hi there"));
        session
    }

    #[test]
    fn file_store_round_trip() {
        let temp = tempdir().expect("tempdir");
        let store = FileSnapshotStore::new(temp.path().join("nested").join("sessions.json"));
        assert_eq!(store.load().expect("empty load"), None);

        let snapshot = MemorySnapshot::new(vec![sample_session("a"), sample_session("b")]);
        store.save(&snapshot).expect("save");
        assert_eq!(store.load().expect("load"), Some(snapshot));
        assert!(!temp.path().join("nested").join("sessions.json.tmp").exists());
    }

    #[test]
    fn unreadable_snapshot_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("sessions.json");
        fs::write(&path, "{ not json").expect("write");
        let store = FileSnapshotStore::new(&path);
        assert!(matches!(store.load(), Err(PersistenceError::Serde(_))));
    }

    #[test]
    fn future_versions_are_rejected() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("sessions.json");
        let mut snapshot = MemorySnapshot::new(Vec::new());
        snapshot.version = 2;
        fs::write(&path, serde_json::to_string(&snapshot).expect("encode")).expect("write");
        let store = FileSnapshotStore::new(&path);
        assert!(matches!(
            store.load(),
            Err(PersistenceError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn duplicate_ids_are_corrupt() {
        let session = sample_session("dup");
        let snapshot = MemorySnapshot::new(vec![session.clone(), session]);
        assert!(matches!(
            snapshot.validate(),
            Err(PersistenceError::Corrupt(_))
        ));
    }
}
