//! Test helpers shared across Parley crates.

pub mod completion;
pub mod events;
pub mod providers;

pub use completion::{EchoCompletion, FailingCompletion, RepeatingCallCompletion, ScriptedCompletion};
pub use events::RecordingSink;
pub use providers::{FakeBehavior, FakeConnector, FakeProvider};
