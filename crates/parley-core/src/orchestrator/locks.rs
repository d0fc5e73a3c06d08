//! Per-session turn serialization.

use parking_lot::Mutex;
use parley_protocol::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as TurnMutex, OwnedMutexGuard};

/// One fair async mutex per session.
///
/// `tokio::sync::Mutex` grants the lock in request order, which gives turns on
/// the same session first-come first-served ordering. Different sessions never
/// contend.
#[derive(Clone, Default)]
pub(crate) struct SessionLocks {
    locks: Arc<Mutex<HashMap<SessionId, Arc<TurnMutex<()>>>>>,
}

impl SessionLocks {
    /// Wait for exclusive use of a session.
    pub(crate) async fn acquire(&self, session_id: SessionId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .entry(session_id)
            .or_insert_with(|| Arc::new(TurnMutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry for a deleted session once nobody holds or waits on it.
    pub(crate) fn forget(&self, session_id: SessionId) {
        let mut locks = self.locks.lock();
        if locks
            .get(&session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&session_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}
