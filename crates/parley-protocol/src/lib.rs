//! Wire protocol types for Parley sessions, capabilities, and turn events.

mod admin;
mod capability;
mod error;
mod frames;
mod session;

pub use admin::{
    DeleteReceipt, Health, HealthStatus, MemoryStats, PromptOutput, ResourceContent, SaveReceipt,
};
pub use capability::{
    Capability, CapabilityKind, CapabilityRef, InvocationResult, ProviderStatus, ProviderSummary,
};
pub use error::{ProviderError, ProviderErrorKind};
pub use frames::{ChatRequest, ChatResponse, ClientFrame, ServerFrame, TurnKind};
pub use session::{
    CallOutcome, Message, ProviderCall, Role, Session, SessionId, SessionStats, SessionSummary,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a turn.
pub type TurnId = Uuid;

/// Progress event emitted while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnEvent {
    /// Unique id for the event.
    pub id: Uuid,
    /// Session the turn belongs to.
    pub session_id: SessionId,
    /// Turn that emitted the event.
    pub turn_id: TurnId,
    /// Timestamp when the event was created.
    pub created_at: DateTime<Utc>,
    /// Event payload content.
    pub payload: TurnEventPayload,
}

impl TurnEvent {
    pub fn new(session_id: SessionId, turn_id: TurnId, payload: TurnEventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            turn_id,
            created_at: Utc::now(),
            payload,
        }
    }
}

/// All events emitted during a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum TurnEventPayload {
    /// The turn acquired its session and recorded the user message.
    TurnStarted { query: String },
    /// A capability invocation was dispatched.
    CapabilityCallStarted {
        call_id: String,
        capability: CapabilityRef,
        arguments: Value,
    },
    /// A capability invocation returned or failed.
    CapabilityCallFinished {
        call_id: String,
        capability: CapabilityRef,
        success: bool,
    },
    /// The turn produced its final assistant message.
    TurnCompleted { round_trips: usize, truncated: bool },
    /// The turn terminated with an error.
    TurnFailed { message: String },
}

/// Sink interface for turn events.
pub trait EventSink: Send + Sync {
    /// Emit an event to downstream listeners.
    fn emit(&self, event: TurnEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn turn_event_round_trips_through_json() {
        let event = TurnEvent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            TurnEventPayload::CapabilityCallFinished {
                call_id: "call-1".to_string(),
                capability: CapabilityRef::tool("calc", "add"),
                success: true,
            },
        );
        let encoded = serde_json::to_value(&event).expect("serialize");
        assert_eq!(encoded["payload"]["type"], json!("capability_call_finished"));
        let decoded: TurnEvent = serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(decoded, event);
    }
}
