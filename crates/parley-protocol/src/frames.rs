//! Delivery payloads: single-turn responses and streaming frames.

use crate::{
    Message, ProviderCall, ResourceContent, SessionId, SessionStats, SessionSummary, TurnEvent,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a submitted query was handled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// A full turn through the completion service.
    Chat,
    /// A slash command answered locally.
    Command,
    /// An `@uri` resource shortcut.
    Resource,
}

/// Response for one submitted query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub session_id: SessionId,
    pub session_title: String,
    pub message: Message,
    /// Provider calls made while producing the message.
    #[serde(default)]
    pub tool_calls: Vec<ProviderCall>,
    #[serde(default)]
    pub stats: Option<SessionStats>,
    pub kind: TurnKind,
    pub timestamp: DateTime<Utc>,
}

/// Inbound request body for a single turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// Frames a streaming client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ClientFrame {
    /// Run one turn.
    Chat {
        #[serde(default)]
        request_id: Option<String>,
        query: String,
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    /// Create a new session.
    CreateSession {
        #[serde(default)]
        title: Option<String>,
    },
    /// List all sessions.
    ListSessions,
    /// Fetch a resource directly.
    GetResource {
        uri: String,
        #[serde(default)]
        provider: Option<String>,
    },
    /// Heartbeat.
    Ping {
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

/// Frames the server pushes to a streaming client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ServerFrame {
    Welcome {
        connection_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    ChatResponse {
        request_id: Option<String>,
        response: ChatResponse,
    },
    SessionCreated {
        session: SessionSummary,
    },
    SessionsList {
        sessions: Vec<SessionSummary>,
    },
    ResourceResponse {
        resource: ResourceContent,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    TurnEvent {
        event: TurnEvent,
    },
    Error {
        request_id: Option<String>,
        error: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServerFrame {
    /// Build an error frame stamped with the current time.
    pub fn error(
        request_id: Option<String>,
        error: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ServerFrame::Error {
            request_id,
            error: error.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
