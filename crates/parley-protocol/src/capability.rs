//! Capability descriptors discovered from providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kind of invocable unit a provider exposes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Prompt,
    Resource,
}

impl CapabilityKind {
    /// Return the kind as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tool",
            CapabilityKind::Prompt => "prompt",
            CapabilityKind::Resource => "resource",
        }
    }
}

impl FromStr for CapabilityKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "tool" | "tools" => Ok(CapabilityKind::Tool),
            "prompt" | "prompts" => Ok(CapabilityKind::Prompt),
            "resource" | "resources" => Ok(CapabilityKind::Resource),
            other => Err(format!("unknown capability kind: {other}")),
        }
    }
}

/// Provider-qualified reference to a single capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CapabilityRef {
    /// Provider that owns the capability.
    pub provider_id: String,
    /// Capability kind.
    pub kind: CapabilityKind,
    /// Tool or prompt name, or resource uri.
    pub name: String,
}

impl CapabilityRef {
    pub fn new(provider_id: impl Into<String>, kind: CapabilityKind, name: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            kind,
            name: name.into(),
        }
    }

    pub fn tool(provider_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(provider_id, CapabilityKind::Tool, name)
    }
}

impl fmt::Display for CapabilityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.provider_id, self.name)
    }
}

/// Capability advertised by a provider during discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Capability {
    /// Provider that owns the capability.
    pub provider_id: String,
    /// Capability kind.
    pub kind: CapabilityKind,
    /// Tool or prompt name, or resource uri.
    pub name: String,
    /// Optional human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Structural description of accepted arguments.
    #[serde(default = "empty_schema")]
    pub input_schema: Value,
}

impl Capability {
    /// Build the qualified reference for this capability.
    pub fn reference(&self) -> CapabilityRef {
        CapabilityRef::new(self.provider_id.clone(), self.kind, self.name.clone())
    }

    /// Whether this capability is addressed by the given reference.
    pub fn matches(&self, reference: &CapabilityRef) -> bool {
        self.provider_id == reference.provider_id
            && self.kind == reference.kind
            && self.name == reference.name
    }
}

/// Lifecycle state for a provider connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Connecting,
    Ready,
    Degraded,
    Closed,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Connecting => "connecting",
            ProviderStatus::Ready => "ready",
            ProviderStatus::Degraded => "degraded",
            ProviderStatus::Closed => "closed",
        }
    }
}

/// Summary view of one provider connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSummary {
    /// Provider identifier from configuration.
    pub id: String,
    /// Current connection status.
    pub status: ProviderStatus,
    /// Number of capabilities discovered on the current connection.
    pub capabilities: usize,
    /// Most recent connect or transport error.
    pub last_error: Option<String>,
    /// When the current connection became ready.
    pub connected_at: Option<DateTime<Utc>>,
}

/// Successful result of a provider invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvocationResult {
    /// Text rendering of the result content.
    pub text: String,
    /// Raw structured result as returned by the provider.
    pub content: Value,
}

impl InvocationResult {
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            content: Value::String(text.clone()),
            text,
        }
    }
}

fn empty_schema() -> Value {
    serde_json::json!({ "type": "object" })
}
