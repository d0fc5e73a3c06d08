//! Conversation data model: sessions, messages, and provider call records.

use crate::{CapabilityRef, ProviderErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a session.
pub type SessionId = Uuid;

/// Speaker role for a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User-authored message.
    User,
    /// Assistant-authored message.
    Assistant,
    /// Result of a provider capability round-trip.
    Tool,
}

impl Role {
    /// Return the role as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Outcome of a single provider call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CallOutcome {
    /// The provider returned a result.
    Success { output: Value },
    /// The call failed; the error was fed back to the completion service.
    Failure {
        kind: ProviderErrorKind,
        message: String,
    },
}

/// Record of one capability invocation made during a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderCall {
    /// Call id shared with the completion service.
    pub call_id: String,
    /// Capability that was invoked.
    pub capability: CapabilityRef,
    /// Arguments passed to the capability.
    pub arguments: Value,
    /// Result or failure.
    pub outcome: CallOutcome,
}

impl ProviderCall {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, CallOutcome::Success { .. })
    }
}

/// Message stored in a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role that produced the message.
    pub role: Role,
    /// Message content.
    pub content: String,
    /// Timestamp for the message.
    pub created_at: DateTime<Utc>,
    /// Present when the message records a provider round-trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_call: Option<ProviderCall>,
    /// Set on an assistant message cut short by the tool round-trip ceiling.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Build a tool message carrying a provider call record.
    pub fn tool(content: impl Into<String>, call: ProviderCall) -> Self {
        Self {
            provider_call: Some(call),
            ..Self::new(Role::Tool, content)
        }
    }

    /// Assistant message that ended a turn at the round-trip ceiling.
    pub fn truncated(content: impl Into<String>) -> Self {
        Self {
            truncated: true,
            ..Self::new(Role::Assistant, content)
        }
    }

    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
            provider_call: None,
            truncated: false,
        }
    }
}

/// Full session transcript with messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Display title.
    pub title: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent mutation.
    pub last_active_at: DateTime<Utc>,
    /// Ordered list of messages in the session.
    pub messages: Vec<Message>,
}

impl Session {
    /// Build an empty session with the given id and title.
    pub fn new(id: SessionId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            created_at: now,
            last_active_at: now,
            messages: Vec::new(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            title: self.title.clone(),
            created_at: self.created_at,
            last_active_at: self.last_active_at,
            message_count: self.messages.len(),
        }
    }

    /// Derive usage statistics from the transcript.
    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats {
            session_id: self.id,
            message_count: self.messages.len(),
            user_messages: 0,
            assistant_messages: 0,
            tool_messages: 0,
            provider_call_count: 0,
            content_bytes: 0,
            estimated_tokens: 0,
            created_at: self.created_at,
            last_active_at: self.last_active_at,
            duration_secs: (self.last_active_at - self.created_at).num_seconds().max(0),
        };
        for message in &self.messages {
            match message.role {
                Role::User => stats.user_messages += 1,
                Role::Assistant => stats.assistant_messages += 1,
                Role::Tool => stats.tool_messages += 1,
            }
            if message.provider_call.is_some() {
                stats.provider_call_count += 1;
            }
            stats.content_bytes += message.content.len();
        }
        stats.estimated_tokens = stats.content_bytes.div_ceil(4);
        stats
    }
}

/// Summary view of a session for listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Derived usage statistics for one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStats {
    pub session_id: SessionId,
    pub message_count: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub tool_messages: usize,
    pub provider_call_count: usize,
    /// Total bytes of message content.
    pub content_bytes: usize,
    /// Rough token estimate (four bytes per token).
    pub estimated_tokens: usize,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub duration_secs: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CapabilityRef;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn role_parses_and_formats() {
        assert_eq!("tool".parse::<Role>(), Ok(Role::Tool));
        assert_eq!("assistant".parse::<Role>(), Ok(Role::Assistant));
        assert!("system".parse::<Role>().is_err());
        assert_eq!(Role::User.as_str(), "user");
    }

    #[test]
    fn stats_count_roles_and_provider_calls() {
        let mut session = Session::new(Uuid::new_v4(), "Demo");
        session.messages.push(Message::user("What's 2+2?"));
        session.messages.push(Message::tool(
            "4",
            ProviderCall {
                call_id: "call-1".to_string(),
                capability: CapabilityRef::tool("calc", "add"),
                arguments: json!({ "a": 2, "b": 2 }),
                outcome: CallOutcome::Success { output: json!("4") },
            },
        ));
        session.messages.push(Message::assistant("The answer is 4"));

        let stats = session.stats();
        assert_eq!(stats.message_count, 3);
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.tool_messages, 1);
        assert_eq!(stats.assistant_messages, 1);
        assert_eq!(stats.provider_call_count, 1);
        assert_eq!(stats.content_bytes, 11 + 1 + 15);
        assert_eq!(stats.estimated_tokens, 7);
    }

    #[test]
    fn plain_messages_omit_provider_call_field() {
        let message = Message::assistant("hi");
        let value = serde_json::to_value(&message).expect("serialize");
        assert!(value.get("provider_call").is_none());
        assert!(value.get("truncated").is_none());
        assert_eq!(value["role"], json!("assistant"));

        let cut = serde_json::to_value(Message::truncated("partial")).expect("serialize");
        assert_eq!(cut["truncated"], json!(true));
    }
}
