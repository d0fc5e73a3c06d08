//! Debounced snapshot writer.
//!
//! Mutations bump a shared counter. A background task saves the store on a
//! fixed cadence, or early once enough mutations are pending. Anything
//! mutated after the last successful save is lost on a crash.

use crate::error::{CoreError, PersistenceError};
use crate::sessions::SessionStore;
use crate::state::SnapshotStore;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use parking_lot::{Mutex, RwLock};
use parley_protocol::SaveReceipt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

/// Count of store mutations not yet covered by a snapshot.
#[derive(Debug, Clone, Default)]
pub struct MutationCounter {
    pending: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl MutationCounter {
    pub(crate) fn bump(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Reset to zero, returning what was pending.
    fn take(&self) -> u64 {
        self.pending.swap(0, Ordering::SeqCst)
    }

    /// Put back a count whose save failed.
    fn restore(&self, count: u64) {
        self.pending.fetch_add(count, Ordering::SeqCst);
    }

    async fn changed(&self) {
        self.notify.notified().await;
    }
}

/// Outcome of the most recent save attempt.
#[derive(Debug, Clone, Default)]
pub struct PersistenceStatus {
    pub last_saved_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// When the background task flushes.
#[derive(Debug, Clone, Copy)]
pub struct SaveSchedule {
    pub interval: Duration,
    /// Flush early once this many mutations are pending. Zero disables early flushes.
    pub after_mutations: u64,
}

/// Writes store snapshots to a `SnapshotStore`, in the background and on demand.
pub struct SnapshotWriter {
    sessions: SessionStore,
    backend: Option<Arc<dyn SnapshotStore>>,
    schedule: SaveSchedule,
    status: RwLock<PersistenceStatus>,
    /// Keeps concurrent saves from overtaking each other.
    save_lock: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotWriter {
    pub fn new(
        sessions: SessionStore,
        backend: Option<Arc<dyn SnapshotStore>>,
        schedule: SaveSchedule,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            sessions,
            backend,
            schedule,
            status: RwLock::new(PersistenceStatus::default()),
            save_lock: tokio::sync::Mutex::new(()),
            shutdown,
            task: Mutex::new(None),
        })
    }

    pub fn enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn location(&self) -> Option<String> {
        self.backend.as_ref().map(|backend| backend.location())
    }

    pub fn status(&self) -> PersistenceStatus {
        self.status.read().clone()
    }

    /// Spawn the background flush loop. No-op when persistence is off or already running.
    pub fn start(self: &Arc<Self>) {
        if self.backend.is_none() {
            debug!("snapshot persistence disabled; writer not started");
            return;
        }
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let writer = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        info!(
            "starting snapshot writer (interval_secs={}, after_mutations={})",
            self.schedule.interval.as_secs(),
            self.schedule.after_mutations
        );
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(writer.schedule.interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = writer.sessions.mutations().changed() => {
                        let threshold = writer.schedule.after_mutations;
                        if threshold == 0 || writer.sessions.mutations().pending() < threshold {
                            continue;
                        }
                        debug!("mutation threshold reached; flushing early");
                    }
                    _ = shutdown.changed() => break,
                }
                if writer.sessions.mutations().pending() > 0 {
                    // Failures are recorded in status and retried next round.
                    let _ = writer.save().await;
                }
            }
        }));
    }

    /// Write a snapshot right away.
    pub async fn save_now(&self) -> Result<SaveReceipt, CoreError> {
        self.save().await.map_err(CoreError::from)
    }

    /// Stop the background task and flush a final snapshot.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            error!("snapshot writer task failed: {}", err);
        }
        if self.backend.is_some() {
            info!("flushing final snapshot");
            self.save_now().await?;
        }
        Ok(())
    }

    async fn save(&self) -> Result<SaveReceipt, PersistenceError> {
        let backend = self.backend.clone().ok_or(PersistenceError::Disabled)?;
        let _guard = self.save_lock.lock().await;
        let taken = self.sessions.mutations().take();
        let snapshot = self.sessions.snapshot();
        let receipt = SaveReceipt {
            saved_at: snapshot.saved_at,
            sessions: snapshot.sessions.len(),
        };
        let result = tokio::task::spawn_blocking(move || backend.save(&snapshot))
            .await
            .unwrap_or_else(|err| {
                Err(PersistenceError::Io(std::io::Error::other(err.to_string())))
            });

        let mut status = self.status.write();
        match result {
            Ok(()) => {
                debug!(
                    "saved snapshot (sessions={}, mutations={})",
                    receipt.sessions, taken
                );
                status.last_saved_at = Some(receipt.saved_at);
                status.last_error = None;
                Ok(receipt)
            }
            Err(err) => {
                error!("snapshot save failed: {}", err);
                self.sessions.mutations().restore(taken);
                status.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SaveSchedule, SnapshotWriter};
    use crate::error::{CoreError, PersistenceError};
    use crate::sessions::SessionStore;
    use crate::state::{FileSnapshotStore, SnapshotStore};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn schedule(after_mutations: u64) -> SaveSchedule {
        SaveSchedule {
            interval: Duration::from_secs(3600),
            after_mutations,
        }
    }

    #[tokio::test]
    async fn save_now_writes_snapshot_and_resets_counter() {
        let temp = tempdir().expect("tempdir");
        let backend = Arc::new(FileSnapshotStore::new(temp.path().join("sessions.json")));
        let sessions = SessionStore::new(8);
        sessions.create(Some("Demo".to_string())).expect("create");
        let writer = SnapshotWriter::new(sessions.clone(), Some(backend.clone()), schedule(0));

        let receipt = writer.save_now().await.expect("save");
        assert_eq!(receipt.sessions, 1);
        assert_eq!(sessions.mutations().pending(), 0);
        assert_eq!(writer.status().last_saved_at, Some(receipt.saved_at));

        let loaded = backend.load().expect("load").expect("snapshot");
        assert_eq!(loaded.sessions[0].title, "Demo".to_string());
    }

    #[tokio::test]
    async fn disabled_writer_refuses_explicit_save() {
        let writer = SnapshotWriter::new(SessionStore::new(1), None, schedule(0));
        assert!(matches!(
            writer.save_now().await,
            Err(CoreError::Persistence(PersistenceError::Disabled))
        ));
        writer.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn mutation_threshold_triggers_background_flush() {
        let temp = tempdir().expect("tempdir");
        let backend = Arc::new(FileSnapshotStore::new(temp.path().join("sessions.json")));
        let sessions = SessionStore::new(8);
        let writer = SnapshotWriter::new(sessions.clone(), Some(backend.clone()), schedule(2));
        writer.start();

        sessions.create(None).expect("one");
        sessions.create(None).expect("two");

        let mut saved = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Some(snapshot) = backend.load().expect("load") {
                saved = Some(snapshot);
                break;
            }
        }
        assert_eq!(saved.map(|snapshot| snapshot.sessions.len()), Some(2));
        writer.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn failed_save_is_reported_and_keeps_pending_count() {
        let temp = tempdir().expect("tempdir");
        // A directory in place of the snapshot file makes the rename fail.
        let path = temp.path().join("sessions.json");
        std::fs::create_dir_all(path.join("occupied")).expect("dir");
        let sessions = SessionStore::new(8);
        sessions.create(None).expect("create");
        let writer = SnapshotWriter::new(
            sessions.clone(),
            Some(Arc::new(FileSnapshotStore::new(&path))),
            schedule(0),
        );

        assert!(writer.save_now().await.is_err());
        assert_eq!(sessions.mutations().pending(), 1);
        assert!(writer.status().last_error.is_some());
    }
}
