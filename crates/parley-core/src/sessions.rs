//! In-memory session store, the authoritative home of every conversation.

use crate::error::{CoreError, PersistenceError};
use crate::persistence::MutationCounter;
use crate::state::MemorySnapshot;
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::RwLock;
use parley_protocol::{Message, Session, SessionId, SessionStats, SessionSummary};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use uuid::Uuid;

/// Title used when a session is created without one.
pub fn default_title() -> String {
    format!("Chat {}", Utc::now().format("%Y-%m-%d %H:%M"))
}

fn normalize_title(title: String) -> String {
    match title.trim() {
        "" => default_title(),
        trimmed => trimmed.to_string(),
    }
}

/// Concurrency-safe session map with a capacity ceiling.
///
/// Capacity is enforced by refusing new sessions; nothing is ever evicted.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
    max_sessions: usize,
    mutations: MutationCounter,
}

impl SessionStore {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
            mutations: MutationCounter::default(),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Counter bumped on every mutation, drained by the snapshot writer.
    pub fn mutations(&self) -> &MutationCounter {
        &self.mutations
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Total messages across every session.
    pub fn total_messages(&self) -> usize {
        self.sessions
            .read()
            .values()
            .map(|session| session.messages.len())
            .sum()
    }

    /// Allocate a fresh session.
    pub fn create(&self, title: Option<String>) -> Result<Session, CoreError> {
        self.create_with_id(Uuid::new_v4(), title)
    }

    /// Create a session under a caller-chosen id.
    pub fn create_with_id(
        &self,
        session_id: SessionId,
        title: Option<String>,
    ) -> Result<Session, CoreError> {
        let title = title.map(normalize_title).unwrap_or_else(default_title);
        let mut sessions = self.sessions.write();
        let at_capacity = sessions.len() >= self.max_sessions;
        let session = match sessions.entry(session_id) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(_) if at_capacity => {
                warn!(
                    "rejecting session creation at capacity (limit={})",
                    self.max_sessions
                );
                return Err(CoreError::CapacityExceeded {
                    limit: self.max_sessions,
                });
            }
            Entry::Vacant(slot) => slot.insert(Session::new(session_id, title)).clone(),
        };
        drop(sessions);
        info!(
            "created session (session_id={}, title={})",
            session.id, session.title
        );
        self.mutations.bump();
        Ok(session)
    }

    /// Return the session if present, otherwise create it under that id.
    pub fn get_or_create(&self, session_id: SessionId) -> Result<Session, CoreError> {
        if let Some(session) = self.sessions.read().get(&session_id) {
            return Ok(session.clone());
        }
        self.create_with_id(session_id, None)
    }

    pub fn get(&self, session_id: SessionId) -> Result<Session, CoreError> {
        self.sessions
            .read()
            .get(&session_id)
            .cloned()
            .ok_or_else(|| CoreError::unknown_session(session_id))
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.sessions.read().contains_key(&session_id)
    }

    /// Append one message and bump `last_active_at`.
    pub fn append(&self, session_id: SessionId, message: Message) -> Result<(), CoreError> {
        {
            let mut sessions = self.sessions.write();
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| CoreError::unknown_session(session_id))?;
            debug!(
                "appending message (session_id={}, role={}, content_len={})",
                session_id,
                message.role.as_str(),
                message.content.len()
            );
            session.last_active_at = message.created_at.max(session.last_active_at);
            session.messages.push(message);
        }
        self.mutations.bump();
        Ok(())
    }

    /// Drop every message, keeping id, title, and creation time.
    pub fn clear(&self, session_id: SessionId) -> Result<Session, CoreError> {
        let session = {
            let mut sessions = self.sessions.write();
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| CoreError::unknown_session(session_id))?;
            session.messages.clear();
            session.last_active_at = Utc::now();
            session.clone()
        };
        info!("cleared session (session_id={})", session_id);
        self.mutations.bump();
        Ok(session)
    }

    /// Rename a session. A blank title falls back to the default one.
    pub fn update_title(
        &self,
        session_id: SessionId,
        title: impl Into<String>,
    ) -> Result<Session, CoreError> {
        let title = normalize_title(title.into());
        let session = {
            let mut sessions = self.sessions.write();
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| CoreError::unknown_session(session_id))?;
            session.title = title;
            session.clone()
        };
        debug!(
            "renamed session (session_id={}, title={})",
            session_id, session.title
        );
        self.mutations.bump();
        Ok(session)
    }

    pub fn delete(&self, session_id: SessionId) -> Result<(), CoreError> {
        if self.sessions.write().remove(&session_id).is_none() {
            return Err(CoreError::unknown_session(session_id));
        }
        info!("deleted session (session_id={})", session_id);
        self.mutations.bump();
        Ok(())
    }

    /// Resolve a unique id prefix to a session id.
    pub fn resolve_prefix(&self, prefix: &str) -> Result<SessionId, CoreError> {
        let prefix = prefix.trim().to_ascii_lowercase();
        if prefix.is_empty() {
            return Err(CoreError::SessionNotFound(prefix));
        }
        let sessions = self.sessions.read();
        let mut matches = sessions
            .keys()
            .filter(|id| id.to_string().starts_with(&prefix));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(*id),
            _ => Err(CoreError::SessionNotFound(prefix)),
        }
    }

    /// Delete the single session whose id starts with `prefix`.
    pub fn delete_by_prefix(&self, prefix: &str) -> Result<SessionId, CoreError> {
        let session_id = self.resolve_prefix(prefix)?;
        self.delete(session_id)?;
        Ok(session_id)
    }

    /// Summaries ordered by most recent activity.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries = self
            .sessions
            .read()
            .values()
            .map(Session::summary)
            .collect::<Vec<_>>();
        summaries.sort_by(|a, b| {
            b.last_active_at
                .cmp(&a.last_active_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        summaries
    }

    /// Trailing `limit` messages of a session.
    pub fn messages(&self, session_id: SessionId, limit: usize) -> Result<Vec<Message>, CoreError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(&session_id)
            .ok_or_else(|| CoreError::unknown_session(session_id))?;
        let start = session.messages.len().saturating_sub(limit);
        Ok(session.messages[start..].to_vec())
    }

    pub fn stats(&self, session_id: SessionId) -> Result<SessionStats, CoreError> {
        self.sessions
            .read()
            .get(&session_id)
            .map(Session::stats)
            .ok_or_else(|| CoreError::unknown_session(session_id))
    }

    /// Copy of the entire store.
    pub fn snapshot(&self) -> MemorySnapshot {
        let mut sessions = self.sessions.read().values().cloned().collect::<Vec<_>>();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        MemorySnapshot::new(sessions)
    }

    /// Replace the store contents with a snapshot. Only valid before any session exists.
    pub fn restore(&self, snapshot: MemorySnapshot) -> Result<usize, PersistenceError> {
        let mut restored = HashMap::with_capacity(snapshot.sessions.len());
        for session in snapshot.sessions {
            let session_id = session.id;
            if restored.insert(session_id, session).is_some() {
                return Err(PersistenceError::Corrupt(format!(
                    "duplicate session id {session_id}"
                )));
            }
        }
        let mut sessions = self.sessions.write();
        if !sessions.is_empty() {
            return Err(PersistenceError::StoreNotEmpty(sessions.len()));
        }
        let count = restored.len();
        if count > self.max_sessions {
            warn!(
                "restored sessions exceed capacity (sessions={}, limit={})",
                count, self.max_sessions
            );
        }
        *sessions = restored;
        info!("restored sessions from snapshot (sessions={})", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::SessionStore;
    use crate::error::{CoreError, PersistenceError};
    use parley_protocol::{Message, Role};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn create_applies_default_title_and_capacity() {
        let store = SessionStore::new(2);
        let first = store.create(None).expect("first");
        assert!(first.title.starts_with("Chat "));
        store.create(Some("Demo".to_string())).expect("second");

        let err = store.create(Some("third".to_string())).unwrap_err();
        assert!(matches!(err, CoreError::CapacityExceeded { limit: 2 }));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn clear_keeps_identity() {
        let store = SessionStore::new(4);
        let session = store.create(Some("Demo".to_string())).expect("create");
        store
            .append(session.id, Message::user("hello"))
            .expect("append");
        let cleared = store.clear(session.id).expect("clear");

        assert_eq!(cleared.messages, Vec::new());
        assert_eq!(cleared.id, session.id);
        assert_eq!(cleared.title, "Demo".to_string());
        assert_eq!(cleared.created_at, session.created_at);
    }

    #[test]
    fn missing_session_operations_fail() {
        let store = SessionStore::new(4);
        let id = Uuid::new_v4();
        assert!(matches!(store.get(id), Err(CoreError::SessionNotFound(_))));
        assert!(matches!(
            store.append(id, Message::user("x")),
            Err(CoreError::SessionNotFound(_))
        ));
        assert!(matches!(store.clear(id), Err(CoreError::SessionNotFound(_))));
        assert!(matches!(
            store.update_title(id, "t"),
            Err(CoreError::SessionNotFound(_))
        ));
        assert!(matches!(store.delete(id), Err(CoreError::SessionNotFound(_))));
    }

    #[test]
    fn list_orders_by_recent_activity() {
        let store = SessionStore::new(4);
        let older = store.create(Some("older".to_string())).expect("older");
        let newer = store.create(Some("newer".to_string())).expect("newer");
        store
            .append(older.id, Message::user("bump"))
            .expect("append");

        let titles = store
            .list()
            .into_iter()
            .map(|summary| summary.title)
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["older".to_string(), "newer".to_string()]);
        assert_eq!(store.get(newer.id).expect("newer").messages.len(), 0);
    }

    #[test]
    fn messages_returns_trailing_window() {
        let store = SessionStore::new(4);
        let session = store.create(None).expect("create");
        for idx in 0..5 {
            store
                .append(session.id, Message::new(Role::User, format!("m{idx}")))
                .expect("append");
        }
        let tail = store
            .messages(session.id, 2)
            .expect("messages")
            .into_iter()
            .map(|message| message.content)
            .collect::<Vec<_>>();
        assert_eq!(tail, vec!["m3".to_string(), "m4".to_string()]);
    }

    #[test]
    fn delete_by_prefix_requires_unique_match() {
        let store = SessionStore::new(4);
        let session = store.create(None).expect("create");
        let prefix = session.id.to_string()[..8].to_string();
        assert!(matches!(
            store.delete_by_prefix("zz"),
            Err(CoreError::SessionNotFound(_))
        ));
        assert_eq!(store.delete_by_prefix(&prefix).expect("delete"), session.id);
        assert_eq!(store.is_empty(), true);
    }

    #[test]
    fn restore_rejects_non_empty_store_and_duplicates() {
        let source = SessionStore::new(4);
        source.create(Some("a".to_string())).expect("a");
        let snapshot = source.snapshot();

        let mut duplicated = snapshot.clone();
        duplicated.sessions.push(duplicated.sessions[0].clone());
        let fresh = SessionStore::new(4);
        assert!(matches!(
            fresh.restore(duplicated),
            Err(PersistenceError::Corrupt(_))
        ));
        assert_eq!(fresh.is_empty(), true);

        assert!(matches!(
            source.restore(snapshot),
            Err(PersistenceError::StoreNotEmpty(1))
        ));
    }

    #[test]
    fn blank_titles_fall_back_to_the_default() {
        let store = SessionStore::new(4);
        let session = store.create(Some("Demo".to_string())).expect("create");

        let renamed = store.update_title(session.id, "   ").expect("rename");
        assert!(renamed.title.starts_with("Chat "));

        let renamed = store.update_title(session.id, "  Spaced  ").expect("rename");
        assert_eq!(renamed.title, "Spaced".to_string());
        let blank = store.create(Some(" ".to_string())).expect("blank");
        assert!(blank.title.starts_with("Chat "));
    }

    #[test]
    fn mutations_are_counted() {
        let store = SessionStore::new(4);
        let session = store.create(None).expect("create");
        store.append(session.id, Message::user("x")).expect("append");
        store.update_title(session.id, "t").expect("title");
        assert_eq!(store.mutations().pending(), 3);
    }
}
