//! Payloads for the administrative surface.

use crate::{ProviderSummary, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Content returned by a direct resource fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceContent {
    pub provider_id: String,
    pub uri: String,
    /// Raw content entries as returned by the provider.
    pub contents: Value,
    /// Concatenated text of all textual entries.
    pub text: String,
    pub fetched_at: DateTime<Utc>,
}

/// Output of a direct prompt execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptOutput {
    pub provider_id: String,
    pub name: String,
    pub arguments: Value,
    /// Prompt messages as returned by the provider.
    pub messages: Value,
    /// Concatenated text of all prompt messages.
    pub text: String,
    pub executed_at: DateTime<Utc>,
}

/// Store-wide memory statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryStats {
    pub total_sessions: usize,
    pub max_sessions: usize,
    pub total_messages: usize,
    pub active_tools: usize,
    pub active_prompts: usize,
    pub active_resources: usize,
    pub snapshot_path: Option<String>,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub last_save_error: Option<String>,
    /// Mutations not yet captured by a snapshot.
    pub pending_mutations: u64,
}

/// Overall service health.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Health report combining providers and persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Health {
    pub status: HealthStatus,
    pub sessions: usize,
    pub providers: Vec<ProviderSummary>,
    pub persistence_error: Option<String>,
}

/// Acknowledgement for an explicit snapshot save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaveReceipt {
    pub saved_at: DateTime<Utc>,
    pub sessions: usize,
}

/// Acknowledgement for a session deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeleteReceipt {
    pub session_id: SessionId,
    pub deleted: bool,
}
