//! The per-turn state machine: Resolving -> Deciding -> (Invoking -> Deciding)* -> Done.

use crate::completion::{CapabilityCall, Completion, CompletionRequest, CompletionService};
use crate::error::CoreError;
use crate::sessions::SessionStore;
use log::{debug, info, warn};
use parley_protocol::{
    CallOutcome, EventSink, Message, ProviderCall, SessionId, TurnEvent, TurnEventPayload,
};
use parley_providers::ProviderRegistry;
use std::sync::Arc;
use uuid::Uuid;

/// Inputs for one turn. The caller already holds the session's turn lock.
pub(crate) struct TurnParams {
    pub(crate) session_id: SessionId,
    pub(crate) query: String,
    pub(crate) event_sink: Option<Arc<dyn EventSink>>,
}

/// What a finished turn produced.
#[derive(Debug, Clone)]
pub(crate) struct TurnReport {
    pub(crate) message: Message,
    pub(crate) calls: Vec<ProviderCall>,
}

enum TurnState {
    Resolving,
    Deciding,
    Invoking(CapabilityCall),
    Done(Message),
}

/// Runs turns against the session store, provider registry, and completion service.
pub(crate) struct TurnExecutor {
    sessions: SessionStore,
    registry: ProviderRegistry,
    completion: Arc<dyn CompletionService>,
    max_round_trips: usize,
}

impl TurnExecutor {
    pub(crate) fn new(
        sessions: SessionStore,
        registry: ProviderRegistry,
        completion: Arc<dyn CompletionService>,
        max_round_trips: usize,
    ) -> Self {
        Self {
            sessions,
            registry,
            completion,
            max_round_trips,
        }
    }

    pub(crate) async fn run_turn(&self, params: TurnParams) -> Result<TurnReport, CoreError> {
        let TurnParams {
            session_id,
            query,
            event_sink,
        } = params;
        let turn_id = Uuid::new_v4();
        let emit = |payload: TurnEventPayload| {
            if let Some(sink) = &event_sink {
                sink.emit(TurnEvent::new(session_id, turn_id, payload));
            }
        };
        info!(
            "starting turn (session_id={}, turn_id={}, query_len={})",
            session_id,
            turn_id,
            query.len()
        );

        let mut calls: Vec<ProviderCall> = Vec::new();
        let mut state = TurnState::Resolving;
        loop {
            state = match state {
                TurnState::Resolving => {
                    self.sessions.get_or_create(session_id)?;
                    self.sessions
                        .append(session_id, Message::user(query.clone()))?;
                    emit(TurnEventPayload::TurnStarted {
                        query: query.clone(),
                    });
                    TurnState::Deciding
                }
                TurnState::Deciding => {
                    let request = CompletionRequest {
                        messages: self.sessions.get(session_id)?.messages,
                        capabilities: self.registry.list_capabilities(None),
                    };
                    match self.completion.complete(request).await {
                        Ok(Completion::Message(text)) => {
                            TurnState::Done(Message::assistant(text))
                        }
                        Ok(Completion::Call(call)) if calls.len() >= self.max_round_trips => {
                            warn!(
                                "round-trip ceiling reached (session_id={}, turn_id={}, limit={}, rejected={})",
                                session_id, turn_id, self.max_round_trips, call.capability
                            );
                            TurnState::Done(self.truncated_reply(&calls))
                        }
                        Ok(Completion::Call(call)) => TurnState::Invoking(call),
                        Err(err) => {
                            warn!(
                                "completion failed; abandoning turn (session_id={}, turn_id={}, err={})",
                                session_id, turn_id, err
                            );
                            emit(TurnEventPayload::TurnFailed {
                                message: err.to_string(),
                            });
                            return Err(CoreError::Completion(err));
                        }
                    }
                }
                TurnState::Invoking(call) => {
                    emit(TurnEventPayload::CapabilityCallStarted {
                        call_id: call.call_id.clone(),
                        capability: call.capability.clone(),
                        arguments: call.arguments.clone(),
                    });
                    let record = self.invoke(session_id, call).await;
                    emit(TurnEventPayload::CapabilityCallFinished {
                        call_id: record.call_id.clone(),
                        capability: record.capability.clone(),
                        success: record.succeeded(),
                    });
                    let content = tool_message_content(&record);
                    self.sessions
                        .append(session_id, Message::tool(content, record.clone()))?;
                    calls.push(record);
                    TurnState::Deciding
                }
                TurnState::Done(message) => {
                    self.sessions.append(session_id, message.clone())?;
                    emit(TurnEventPayload::TurnCompleted {
                        round_trips: calls.len(),
                        truncated: message.truncated,
                    });
                    info!(
                        "turn finished (session_id={}, turn_id={}, round_trips={}, truncated={})",
                        session_id,
                        turn_id,
                        calls.len(),
                        message.truncated
                    );
                    return Ok(TurnReport { message, calls });
                }
            };
        }
    }

    /// Invoke one capability. Provider failures become a failed call record.
    async fn invoke(&self, session_id: SessionId, call: CapabilityCall) -> ProviderCall {
        let CapabilityCall {
            call_id,
            capability,
            arguments,
        } = call;
        debug!(
            "invoking capability for turn (session_id={}, capability={}, call_id={})",
            session_id, capability, call_id
        );
        let outcome = match self.registry.invoke(&capability, arguments.clone()).await {
            Ok(result) => CallOutcome::Success {
                output: if result.text.is_empty() {
                    result.content
                } else {
                    serde_json::Value::String(result.text)
                },
            },
            Err(err) => {
                warn!(
                    "capability call failed (session_id={}, capability={}, kind={}, err={})",
                    session_id,
                    capability,
                    err.kind().as_str(),
                    err
                );
                CallOutcome::Failure {
                    kind: err.kind(),
                    message: err.to_string(),
                }
            }
        };
        ProviderCall {
            call_id,
            capability,
            arguments,
            outcome,
        }
    }

    /// Best-effort answer when the model keeps asking for more calls.
    fn truncated_reply(&self, calls: &[ProviderCall]) -> Message {
        let last_output = calls.iter().rev().find_map(|call| match &call.outcome {
            CallOutcome::Success { output } => Some(render_output(output)),
            CallOutcome::Failure { .. } => None,
        });
        let body = match last_output {
            Some(output) => format!("Here is the latest result I obtained:\n{output}"),
            None => "I could not complete this request.".to_string(),
        };
        Message::truncated(format!(
            "{body}\n\n[Response truncated: reached the limit of {} tool calls in one turn.]",
            self.max_round_trips
        ))
    }
}

fn render_output(output: &serde_json::Value) -> String {
    match output {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Text stored on the tool message for a call.
fn tool_message_content(call: &ProviderCall) -> String {
    match &call.outcome {
        CallOutcome::Success { output } => render_output(output),
        CallOutcome::Failure { kind, message } => format!(
            "Error calling {} ({}): {}",
            call.capability,
            kind.as_str(),
            message
        ),
    }
}
