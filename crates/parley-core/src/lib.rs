//! Session store, snapshot persistence, and turn orchestration for Parley.

pub mod commands;
pub mod completion;
pub mod error;
pub mod orchestrator;
pub mod persistence;
pub mod sessions;
pub mod state;

pub use commands::Command;
pub use completion::{
    CapabilityCall, Completion, CompletionRequest, CompletionService, OpenAiCompletion,
};
pub use error::{CompletionError, CoreError, PersistenceError};
pub use orchestrator::{Orchestrator, TurnOutcome, resolve_snapshot_path};
pub use parley_protocol::EventSink;
pub use persistence::{MutationCounter, PersistenceStatus, SaveSchedule, SnapshotWriter};
pub use sessions::{SessionStore, default_title};
pub use state::{FileSnapshotStore, MemorySnapshot, SNAPSHOT_VERSION, SnapshotStore};
