//! Completion service seam: the language model is an opaque collaborator
//! that either answers or asks for one capability call.

mod openai;

pub use openai::OpenAiCompletion;

use crate::error::CompletionError;
use async_trait::async_trait;
use parley_protocol::{Capability, CapabilityRef, Message};
use serde_json::Value;

/// Conversation so far plus the capabilities currently on offer.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub capabilities: Vec<Capability>,
}

/// What the completion service wants to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Final assistant text for the turn.
    Message(String),
    /// Invoke a capability, then ask again.
    Call(CapabilityCall),
}

/// A single capability invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityCall {
    /// Correlates the request with the recorded result.
    pub call_id: String,
    pub capability: CapabilityRef,
    pub arguments: Value,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError>;
}
