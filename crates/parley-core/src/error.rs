//! Error types for the core engine crate.

use parley_protocol::{ProviderError, SessionId};
use thiserror::Error;

/// Errors returned by orchestrator and session store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Session id (or id prefix) is unknown to the store.
    #[error("unknown session: {0}")]
    SessionNotFound(String),
    /// The store already holds the configured maximum number of sessions.
    #[error("session limit reached ({limit} sessions)")]
    CapacityExceeded { limit: usize },
    /// The query was empty after trimming.
    #[error("query must not be empty")]
    EmptyQuery,
    /// Provider lookup or invocation failed outside a turn.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The completion service failed; the turn was abandoned.
    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),
    /// Snapshot read or write failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub(crate) fn unknown_session(session_id: SessionId) -> Self {
        CoreError::SessionNotFound(session_id.to_string())
    }

    /// Stable machine-readable label for client-facing error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::SessionNotFound(_) => "session_not_found",
            CoreError::CapacityExceeded { .. } => "capacity_exceeded",
            CoreError::EmptyQuery => "empty_query",
            CoreError::Provider(ProviderError::NotFound(_)) => "capability_not_found",
            CoreError::Provider(ProviderError::Ambiguous(_)) => "ambiguous_capability",
            CoreError::Provider(ProviderError::InvalidArguments(_)) => "invalid_arguments",
            CoreError::Provider(ProviderError::Unavailable(_)) => "provider_unavailable",
            CoreError::Provider(err) => err.kind().as_str(),
            CoreError::Completion(_) => "completion_failed",
            CoreError::Persistence(_) => "persistence_failed",
            CoreError::Io(_) => "io_error",
        }
    }
}

/// Errors raised by the opaque completion service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompletionError {
    /// The request never produced a response (network, timeout).
    #[error("request failed: {0}")]
    Request(String),
    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    /// The response body could not be interpreted.
    #[error("unreadable response: {0}")]
    Decode(String),
    /// The backend is misconfigured.
    #[error("invalid completion config: {0}")]
    Config(String),
}

/// Errors raised while reading or writing the session snapshot.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),
    /// The snapshot decoded but violates a store invariant.
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
    /// Restore was attempted after sessions already exist.
    #[error("restore requires an empty store ({0} sessions present)")]
    StoreNotEmpty(usize),
    /// Snapshot persistence is turned off in config.
    #[error("snapshot persistence is disabled")]
    Disabled,
}
