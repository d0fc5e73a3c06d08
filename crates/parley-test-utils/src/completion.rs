use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::{CapabilityCall, Completion, CompletionError, CompletionRequest, CompletionService};
use parley_protocol::{CapabilityRef, Role};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Completion backend that replays a fixed script of replies.
///
/// Once the script runs out it answers with a plain "done" message.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCompletion {
    script: Arc<Mutex<VecDeque<Result<Completion, CompletionError>>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    delay: Option<Duration>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.script
            .lock()
            .push_back(Ok(Completion::Message(text.into())));
        self
    }

    pub fn call(self, capability: CapabilityRef, arguments: Value) -> Self {
        self.script.lock().push_back(Ok(Completion::Call(CapabilityCall {
            call_id: format!("call_{}", Uuid::new_v4().simple()),
            capability,
            arguments,
        })));
        self
    }

    pub fn fail(self, error: CompletionError) -> Self {
        self.script.lock().push_back(Err(error));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError> {
        self.requests.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(Completion::Message("done".to_string())))
    }
}

/// Completion backend that always fails.
#[derive(Debug, Clone)]
pub struct FailingCompletion {
    message: String,
}

impl FailingCompletion {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl CompletionService for FailingCompletion {
    async fn complete(&self, _request: CompletionRequest) -> Result<Completion, CompletionError> {
        Err(CompletionError::Request(self.message.clone()))
    }
}

/// Completion backend that requests the same capability forever.
#[derive(Debug, Clone)]
pub struct RepeatingCallCompletion {
    capability: CapabilityRef,
    arguments: Value,
    calls: Arc<Mutex<usize>>,
}

impl RepeatingCallCompletion {
    pub fn new(capability: CapabilityRef, arguments: Value) -> Self {
        Self {
            capability,
            arguments,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Number of completion requests served.
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl CompletionService for RepeatingCallCompletion {
    async fn complete(&self, _request: CompletionRequest) -> Result<Completion, CompletionError> {
        let mut calls = self.calls.lock();
        *calls += 1;
        Ok(Completion::Call(CapabilityCall {
            call_id: format!("call_{}", *calls),
            capability: self.capability.clone(),
            arguments: self.arguments.clone(),
        }))
    }
}

/// Completion backend that answers "echo: <last user message>".
#[derive(Debug, Clone, Default)]
pub struct EchoCompletion {
    delay: Option<Duration>,
}

impl EchoCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

#[async_trait]
impl CompletionService for EchoCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let last = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.clone())
            .unwrap_or_default();
        Ok(Completion::Message(format!("echo: {last}")))
    }
}
