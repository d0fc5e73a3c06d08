//! Provider-protocol client over a child process, built on `rmcp`.

use crate::client::{ProviderClient, ProviderConnector};
use async_trait::async_trait;
use log::{debug, info, warn};
use parley_config::ProviderConfig;
use parley_protocol::{Capability, CapabilityKind, InvocationResult, ProviderError};
use rmcp::model::{CallToolRequestParams, ClientInfo};
use rmcp::service::{Peer, RunningService};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::{RoleClient, ServiceError, serve_client};
use serde_json::{Map, Value, json};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Spawns providers as child processes speaking the provider protocol on stdio.
pub struct McpConnector {
    client_name: String,
}

impl McpConnector {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn client_info(&self) -> ClientInfo {
        ClientInfo {
            meta: None,
            protocol_version: Default::default(),
            capabilities: Default::default(),
            client_info: rmcp::model::Implementation {
                name: self.client_name.clone(),
                title: Some("Parley provider client".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                description: None,
                icons: None,
                website_url: None,
            },
        }
    }
}

impl Default for McpConnector {
    fn default() -> Self {
        Self::new("parley")
    }
}

#[async_trait]
impl ProviderConnector for McpConnector {
    async fn connect(
        &self,
        provider_id: &str,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        info!(
            "spawning provider process (provider_id={}, command={}, args={:?}, cwd={:?})",
            provider_id, config.command, config.args, config.cwd
        );
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(&config.env);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let transport = TokioChildProcess::new(cmd).map_err(|err| {
            ProviderError::Transport(format!("failed to spawn {provider_id}: {err}"))
        })?;
        let service = serve_client(self.client_info(), transport)
            .await
            .map_err(|err| {
                ProviderError::Transport(format!("handshake with {provider_id} failed: {err}"))
            })?;
        let peer = service.peer().clone();

        Ok(Arc::new(McpClient {
            provider_id: provider_id.to_string(),
            peer,
            service: Mutex::new(Some(service)),
        }))
    }
}

/// One running provider process.
pub struct McpClient {
    provider_id: String,
    peer: Peer<RoleClient>,
    /// Held to keep the transport alive; taken on close.
    service: Mutex<Option<RunningService<RoleClient, ClientInfo>>>,
}

#[async_trait]
impl ProviderClient for McpClient {
    async fn discover(&self) -> Result<Vec<Capability>, ProviderError> {
        let tools = self.peer.list_all_tools().await.map_err(map_service_error)?;
        let mut capabilities = Vec::with_capacity(tools.len());
        for tool in &tools {
            capabilities.push(wire_to_capability(
                &self.provider_id,
                CapabilityKind::Tool,
                &to_wire(tool)?,
            )?);
        }

        // Prompts and resources are optional protocol features.
        match self.peer.list_all_prompts().await {
            Ok(prompts) => {
                for prompt in &prompts {
                    capabilities.push(wire_to_capability(
                        &self.provider_id,
                        CapabilityKind::Prompt,
                        &to_wire(prompt)?,
                    )?);
                }
            }
            Err(err) => debug!(
                "provider lists no prompts (provider_id={}, err={})",
                self.provider_id, err
            ),
        }
        match self.peer.list_all_resources().await {
            Ok(resources) => {
                for resource in &resources {
                    capabilities.push(wire_to_capability(
                        &self.provider_id,
                        CapabilityKind::Resource,
                        &to_wire(resource)?,
                    )?);
                }
            }
            Err(err) => debug!(
                "provider lists no resources (provider_id={}, err={})",
                self.provider_id, err
            ),
        }
        Ok(capabilities)
    }

    async fn invoke(
        &self,
        kind: CapabilityKind,
        name: &str,
        arguments: Value,
    ) -> Result<InvocationResult, ProviderError> {
        match kind {
            CapabilityKind::Tool => {
                let result = self
                    .peer
                    .call_tool(CallToolRequestParams {
                        meta: None,
                        name: name.to_string().into(),
                        arguments: arguments.as_object().cloned(),
                        task: None,
                    })
                    .await
                    .map_err(map_service_error)?;
                let text = result
                    .content
                    .iter()
                    .filter_map(|content| content.as_text().map(|text| text.text.to_string()))
                    .collect::<Vec<_>>()
                    .join("\n");
                if result.is_error.unwrap_or(false) {
                    return Err(ProviderError::Rejected(text));
                }
                Ok(InvocationResult {
                    text,
                    content: to_wire(&result)?,
                })
            }
            CapabilityKind::Prompt => {
                let params = serde_json::from_value(json!({
                    "name": name,
                    "arguments": stringify_arguments(arguments),
                }))
                .map_err(|err| ProviderError::InvalidArguments(err.to_string()))?;
                let result = self
                    .peer
                    .get_prompt(params)
                    .await
                    .map_err(map_service_error)?;
                let content = to_wire(&result)?;
                Ok(InvocationResult {
                    text: collect_text(&content).join("\n"),
                    content,
                })
            }
            CapabilityKind::Resource => {
                let params = serde_json::from_value(json!({ "uri": name }))
                    .map_err(|err| ProviderError::InvalidArguments(err.to_string()))?;
                let result = self
                    .peer
                    .read_resource(params)
                    .await
                    .map_err(map_service_error)?;
                let content = to_wire(&result)?;
                Ok(InvocationResult {
                    text: collect_text(&content).join("\n"),
                    content,
                })
            }
        }
    }

    async fn close(&self) {
        let Some(service) = self.service.lock().await.take() else {
            return;
        };
        info!("closing provider (provider_id={})", self.provider_id);
        if let Err(err) = service.cancel().await {
            warn!(
                "provider shutdown did not complete cleanly (provider_id={}, err={})",
                self.provider_id, err
            );
        }
    }
}

fn map_service_error(err: ServiceError) -> ProviderError {
    match err {
        ServiceError::McpError(error) => ProviderError::Rejected(error.message.to_string()),
        other => ProviderError::Transport(other.to_string()),
    }
}

fn to_wire<T: serde::Serialize>(value: &T) -> Result<Value, ProviderError> {
    serde_json::to_value(value)
        .map_err(|err| ProviderError::Transport(format!("unencodable provider payload: {err}")))
}

/// Prompt arguments travel as strings on the wire.
fn stringify_arguments(arguments: Value) -> Value {
    match arguments {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(text) => Value::String(text),
                        other => Value::String(other.to_string()),
                    };
                    (key, value)
                })
                .collect(),
        ),
        _ => Value::Object(Map::new()),
    }
}

/// Convert a discovery payload (tool, prompt, or resource) into a capability.
pub(crate) fn wire_to_capability(
    provider_id: &str,
    kind: CapabilityKind,
    wire: &Value,
) -> Result<Capability, ProviderError> {
    let field = |key: &str| wire.get(key).and_then(Value::as_str).map(str::to_string);
    let (name, input_schema) = match kind {
        CapabilityKind::Tool => (
            field("name"),
            wire.get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({ "type": "object" })),
        ),
        CapabilityKind::Prompt => (field("name"), prompt_schema(wire.get("arguments"))),
        CapabilityKind::Resource => (field("uri"), json!({ "type": "object" })),
    };
    let name = name.ok_or_else(|| {
        ProviderError::Transport(format!(
            "{} from {provider_id} has no identifier",
            kind.as_str()
        ))
    })?;
    let description = field("description").or_else(|| match kind {
        CapabilityKind::Resource => field("name"),
        _ => None,
    });
    Ok(Capability {
        provider_id: provider_id.to_string(),
        kind,
        name,
        description,
        input_schema,
    })
}

/// Build an object schema from a prompt's declared argument list.
fn prompt_schema(arguments: Option<&Value>) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for argument in arguments.and_then(Value::as_array).into_iter().flatten() {
        let Some(name) = argument.get("name").and_then(Value::as_str) else {
            continue;
        };
        let mut property = Map::new();
        property.insert("type".to_string(), json!("string"));
        if let Some(description) = argument.get("description") {
            property.insert("description".to_string(), description.clone());
        }
        properties.insert(name.to_string(), Value::Object(property));
        if argument.get("required").and_then(Value::as_bool) == Some(true) {
            required.push(json!(name));
        }
    }
    json!({ "type": "object", "properties": properties, "required": required })
}

/// Collect every `text` string in a provider payload, depth first.
pub(crate) fn collect_text(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    walk_text(value, &mut out);
    out
}

fn walk_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                match (key.as_str(), value) {
                    ("text", Value::String(text)) => out.push(text.clone()),
                    _ => walk_text(value, out),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| walk_text(item, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::{collect_text, stringify_arguments, wire_to_capability};
    use parley_protocol::CapabilityKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn tool_payload_maps_schema_and_description() {
        let wire = json!({
            "name": "add",
            "description": "Add two numbers",
            "inputSchema": { "type": "object", "required": ["a", "b"] },
        });
        let capability =
            wire_to_capability("calc", CapabilityKind::Tool, &wire).expect("capability");
        assert_eq!(capability.name, "add".to_string());
        assert_eq!(capability.description.as_deref(), Some("Add two numbers"));
        assert_eq!(
            capability.input_schema,
            json!({ "type": "object", "required": ["a", "b"] })
        );
    }

    #[test]
    fn prompt_arguments_become_object_schema() {
        let wire = json!({
            "name": "summarize",
            "arguments": [
                { "name": "topic", "description": "What to summarize", "required": true },
                { "name": "tone" },
            ],
        });
        let capability =
            wire_to_capability("notes", CapabilityKind::Prompt, &wire).expect("capability");
        assert_eq!(
            capability.input_schema,
            json!({
                "type": "object",
                "properties": {
                    "topic": { "type": "string", "description": "What to summarize" },
                    "tone": { "type": "string" },
                },
                "required": ["topic"],
            })
        );
    }

    #[test]
    fn resource_uses_uri_as_name() {
        let wire = json!({ "uri": "notes://today", "name": "Today's notes" });
        let capability =
            wire_to_capability("notes", CapabilityKind::Resource, &wire).expect("capability");
        assert_eq!(capability.name, "notes://today".to_string());
        assert_eq!(capability.description.as_deref(), Some("Today's notes"));
    }

    #[test]
    fn payload_without_identifier_is_rejected() {
        let err = wire_to_capability("calc", CapabilityKind::Tool, &json!({})).unwrap_err();
        assert!(err.to_string().contains("no identifier"));
    }

    #[test]
    fn text_is_collected_from_nested_payloads() {
        let payload = json!({
            "messages": [
                { "role": "user", "content": { "type": "text", "text": "first" } },
                { "role": "assistant", "content": { "type": "text", "text": "second" } },
            ],
        });
        assert_eq!(collect_text(&payload), vec!["first", "second"]);
    }

    #[test]
    fn prompt_arguments_are_stringified() {
        assert_eq!(
            stringify_arguments(json!({ "count": 3, "topic": "rust" })),
            json!({ "count": "3", "topic": "rust" })
        );
        assert_eq!(stringify_arguments(json!(null)), json!({}));
    }
}
