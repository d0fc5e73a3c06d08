//! OpenAI-compatible `/chat/completions` backend.

use super::{CapabilityCall, Completion, CompletionRequest, CompletionService};
use crate::error::CompletionError;
use async_trait::async_trait;
use log::{debug, warn};
use parley_config::CompletionConfig;
use parley_protocol::{CapabilityKind, CapabilityRef, Message, Role};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

/// Function names must match `^[A-Za-z0-9_-]{1,64}$`.
const MAX_FUNCTION_NAME: usize = 64;
const NAME_SEPARATOR: &str = "__";

/// Completion backend speaking the OpenAI chat-completions protocol.
pub struct OpenAiCompletion {
    client: reqwest::Client,
    config: CompletionConfig,
    api_key: Option<String>,
}

impl OpenAiCompletion {
    /// Build a client from config, reading the API key from the configured env var.
    pub fn from_config(config: &CompletionConfig) -> Result<Self, CompletionError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            warn!(
                "completion api key not set; requests go out unauthenticated (env={})",
                config.api_key_env
            );
        }
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(
        config: &CompletionConfig,
        api_key: Option<String>,
    ) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| CompletionError::Config(err.to_string()))?;
        Ok(Self {
            client,
            config: config.clone(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError> {
        let (body, functions) = build_request_body(&self.config, &request);
        debug!(
            "requesting completion (model={}, messages={}, tools={})",
            self.config.model,
            body["messages"].as_array().map(Vec::len).unwrap_or(0),
            functions.len()
        );
        let mut http = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http
            .send()
            .await
            .map_err(|err| CompletionError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| CompletionError::Decode(err.to_string()))?;
        interpret_response(parsed, &functions)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Model-facing function name for a capability.
fn function_name(reference: &CapabilityRef) -> String {
    let raw = format!("{}{}{}", reference.provider_id, NAME_SEPARATOR, reference.name);
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .take(MAX_FUNCTION_NAME)
        .collect()
}

/// Assemble the JSON request and the function-name lookup table for the reply.
fn build_request_body(
    config: &CompletionConfig,
    request: &CompletionRequest,
) -> (Value, HashMap<String, CapabilityRef>) {
    let mut functions = HashMap::new();
    let mut tools = Vec::new();
    for capability in request
        .capabilities
        .iter()
        .filter(|capability| capability.kind == CapabilityKind::Tool)
    {
        let reference = capability.reference();
        let base = function_name(&reference);
        let mut name = base.clone();
        let mut suffix = 2;
        while functions.contains_key(&name) {
            let tail = format!("_{suffix}");
            let keep = base.len().min(MAX_FUNCTION_NAME - tail.len());
            name = format!("{}{}", &base[..keep], tail);
            suffix += 1;
        }
        tools.push(json!({
            "type": "function",
            "function": {
                "name": name,
                "description": capability.description.clone().unwrap_or_default(),
                "parameters": capability.input_schema,
            },
        }));
        functions.insert(name, reference);
    }

    let mut messages = Vec::new();
    if let Some(prompt) = config
        .system_prompt
        .as_deref()
        .filter(|prompt| !prompt.trim().is_empty())
    {
        messages.push(json!({ "role": "system", "content": prompt }));
    }
    let start = request
        .messages
        .len()
        .saturating_sub(config.history_window);
    for message in &request.messages[start..] {
        push_history(&mut messages, message);
    }

    let mut body = json!({
        "model": config.model,
        "max_tokens": config.max_tokens,
        "messages": messages,
    });
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools);
        body["parallel_tool_calls"] = Value::Bool(false);
    }
    (body, functions)
}

/// Convert one stored message into wire messages.
///
/// A tool message expands into the assistant call and the tool reply so the
/// pair stays intact even when the window cuts between them.
fn push_history(out: &mut Vec<Value>, message: &Message) {
    match (message.role, &message.provider_call) {
        (Role::User, _) => out.push(json!({ "role": "user", "content": message.content })),
        (Role::Assistant, _) => {
            out.push(json!({ "role": "assistant", "content": message.content }))
        }
        (Role::Tool, Some(call)) => {
            out.push(json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": [{
                    "id": call.call_id,
                    "type": "function",
                    "function": {
                        "name": function_name(&call.capability),
                        "arguments": call.arguments.to_string(),
                    },
                }],
            }));
            out.push(json!({
                "role": "tool",
                "tool_call_id": call.call_id,
                "content": message.content,
            }));
        }
        (Role::Tool, None) => {
            out.push(json!({ "role": "assistant", "content": message.content }))
        }
    }
}

fn interpret_response(
    response: ChatCompletionResponse,
    functions: &HashMap<String, CapabilityRef>,
) -> Result<Completion, CompletionError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CompletionError::Decode("response has no choices".to_string()))?;
    let ResponseMessage {
        content,
        tool_calls,
    } = choice.message;

    let Some(call) = tool_calls.into_iter().next() else {
        return Ok(Completion::Message(content.unwrap_or_default()));
    };
    let capability = match functions.get(&call.function.name) {
        Some(reference) => reference.clone(),
        // Unknown names still reach the registry so the failure lands in history.
        None => match call.function.name.split_once(NAME_SEPARATOR) {
            Some((provider_id, name)) => CapabilityRef::tool(provider_id, name),
            None => {
                return Err(CompletionError::Decode(format!(
                    "model requested unknown function {}",
                    call.function.name
                )));
            }
        },
    };
    let arguments = if call.function.arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&call.function.arguments)
            .unwrap_or(Value::String(call.function.arguments))
    };
    Ok(Completion::Call(CapabilityCall {
        call_id: call.id,
        capability,
        arguments,
    }))
}

#[cfg(test)]
mod tests {
    use super::{
        ChatCompletionResponse, build_request_body, function_name, interpret_response,
    };
    use crate::completion::{CapabilityCall, Completion, CompletionRequest};
    use parley_config::CompletionConfig;
    use parley_protocol::{
        CallOutcome, Capability, CapabilityKind, CapabilityRef, Message, ProviderCall,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tool(provider: &str, name: &str) -> Capability {
        Capability {
            provider_id: provider.to_string(),
            kind: CapabilityKind::Tool,
            name: name.to_string(),
            description: Some("adds".to_string()),
            input_schema: json!({ "type": "object" }),
        }
    }

    #[test]
    fn function_names_are_sanitized_and_bounded() {
        assert_eq!(
            function_name(&CapabilityRef::tool("calc", "add.v2")),
            "calc__add_v2".to_string()
        );
        let long = function_name(&CapabilityRef::tool("p", &"x".repeat(100)));
        assert_eq!(long.len(), 64);
    }

    #[test]
    fn body_offers_tools_only_and_windows_history() {
        let config = CompletionConfig {
            history_window: 2,
            system_prompt: Some("be brief".to_string()),
            ..CompletionConfig::default()
        };
        let mut resource = tool("notes", "notes://today");
        resource.kind = CapabilityKind::Resource;
        let request = CompletionRequest {
            messages: vec![
                Message::user("first"),
                Message::assistant("reply"),
                Message::user("second"),
            ],
            capabilities: vec![tool("calc", "add"), resource],
        };

        let (body, functions) = build_request_body(&config, &request);
        assert_eq!(
            body["messages"],
            json!([
                { "role": "system", "content": "be brief" },
                { "role": "assistant", "content": "reply" },
                { "role": "user", "content": "second" },
            ])
        );
        assert_eq!(body["tools"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["parallel_tool_calls"], json!(false));
        assert_eq!(
            functions.get("calc__add"),
            Some(&CapabilityRef::tool("calc", "add"))
        );
    }

    #[test]
    fn tool_messages_expand_into_call_and_reply() {
        let call = ProviderCall {
            call_id: "call_1".to_string(),
            capability: CapabilityRef::tool("calc", "add"),
            arguments: json!({ "a": 2, "b": 2 }),
            outcome: CallOutcome::Success { output: json!("4") },
        };
        let request = CompletionRequest {
            messages: vec![Message::tool("4", call)],
            capabilities: Vec::new(),
        };
        let (body, _) = build_request_body(&CompletionConfig::default(), &request);
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["tool_calls"][0]["function"]["name"], json!("calc__add"));
        assert_eq!(messages[1]["tool_call_id"], json!("call_1"));
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn first_tool_call_is_honored() {
        let (_, functions) = build_request_body(
            &CompletionConfig::default(),
            &CompletionRequest {
                messages: Vec::new(),
                capabilities: vec![tool("calc", "add")],
            },
        );
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        { "id": "c1", "type": "function",
                          "function": { "name": "calc__add", "arguments": "{\"a\":2,\"b\":2}" } },
                        { "id": "c2", "type": "function",
                          "function": { "name": "calc__add", "arguments": "{}" } },
                    ],
                },
            }],
        }))
        .expect("decode");

        assert_eq!(
            interpret_response(response, &functions).expect("completion"),
            Completion::Call(CapabilityCall {
                call_id: "c1".to_string(),
                capability: CapabilityRef::tool("calc", "add"),
                arguments: json!({ "a": 2, "b": 2 }),
            })
        );
    }

    #[test]
    fn plain_reply_and_empty_choices() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "content": "4" } }],
        }))
        .expect("decode");
        assert_eq!(
            interpret_response(response, &Default::default()).expect("completion"),
            Completion::Message("4".to_string())
        );

        let empty: ChatCompletionResponse =
            serde_json::from_value(json!({ "choices": [] })).expect("decode");
        assert!(interpret_response(empty, &Default::default()).is_err());
    }
}
