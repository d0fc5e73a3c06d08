use async_trait::async_trait;
use parking_lot::Mutex;
use parley_config::ProviderConfig;
use parley_protocol::{Capability, CapabilityKind, InvocationResult, ProviderError};
use parley_providers::{ProviderClient, ProviderConnector};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// How a fake provider answers one capability.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    Reply(InvocationResult),
    Fail(ProviderError),
    /// Never answers; exercises invocation timeouts.
    Hang,
}

/// In-memory provider with scripted capabilities.
#[derive(Debug, Default)]
pub struct FakeProvider {
    capabilities: Mutex<Vec<Capability>>,
    behaviors: Mutex<HashMap<String, FakeBehavior>>,
    invocations: Mutex<Vec<(CapabilityKind, String, Value)>>,
    closed: Mutex<usize>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a tool with an input schema and a behavior.
    pub fn tool(self: &Arc<Self>, name: &str, schema: Value, behavior: FakeBehavior) -> Arc<Self> {
        self.add(CapabilityKind::Tool, name, schema, behavior)
    }

    pub fn prompt(self: &Arc<Self>, name: &str, schema: Value, behavior: FakeBehavior) -> Arc<Self> {
        self.add(CapabilityKind::Prompt, name, schema, behavior)
    }

    pub fn resource(self: &Arc<Self>, uri: &str, text: &str) -> Arc<Self> {
        self.add(
            CapabilityKind::Resource,
            uri,
            json!({ "type": "object" }),
            FakeBehavior::Reply(InvocationResult {
                text: text.to_string(),
                content: json!({ "contents": [{ "uri": uri, "text": text }] }),
            }),
        )
    }

    /// Change the behavior of an existing capability.
    pub fn set_behavior(&self, name: &str, behavior: FakeBehavior) {
        self.behaviors.lock().insert(name.to_string(), behavior);
    }

    pub fn invocations(&self) -> Vec<(CapabilityKind, String, Value)> {
        self.invocations.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        *self.closed.lock()
    }

    fn add(
        self: &Arc<Self>,
        kind: CapabilityKind,
        name: &str,
        schema: Value,
        behavior: FakeBehavior,
    ) -> Arc<Self> {
        self.capabilities.lock().push(Capability {
            provider_id: String::new(),
            kind,
            name: name.to_string(),
            description: Some(format!("fake {}", kind.as_str())),
            input_schema: schema,
        });
        self.behaviors.lock().insert(name.to_string(), behavior);
        self.clone()
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn discover(&self) -> Result<Vec<Capability>, ProviderError> {
        Ok(self.capabilities.lock().clone())
    }

    async fn invoke(
        &self,
        kind: CapabilityKind,
        name: &str,
        arguments: Value,
    ) -> Result<InvocationResult, ProviderError> {
        self.invocations
            .lock()
            .push((kind, name.to_string(), arguments));
        let behavior = self.behaviors.lock().get(name).cloned();
        match behavior {
            Some(FakeBehavior::Reply(result)) => Ok(result),
            Some(FakeBehavior::Fail(error)) => Err(error),
            Some(FakeBehavior::Hang) => std::future::pending().await,
            None => Err(ProviderError::Rejected(format!("unknown capability {name}"))),
        }
    }

    async fn close(&self) {
        *self.closed.lock() += 1;
    }
}

/// Connector handing out pre-built fake providers by id.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    providers: Arc<Mutex<HashMap<String, Arc<FakeProvider>>>>,
    refusing: Arc<Mutex<HashSet<String>>>,
    connects: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(self, id: &str, provider: Arc<FakeProvider>) -> Self {
        self.providers.lock().insert(id.to_string(), provider);
        self
    }

    /// Make connection attempts for `id` fail (or succeed again).
    pub fn refuse(&self, id: &str, refuse: bool) {
        let mut refusing = self.refusing.lock();
        if refuse {
            refusing.insert(id.to_string());
        } else {
            refusing.remove(id);
        }
    }

    pub fn connect_count(&self, id: &str) -> usize {
        self.connects.lock().get(id).copied().unwrap_or(0)
    }

    /// Config entries for every fake provider, for seeding a registry.
    pub fn provider_configs(&self) -> Vec<(String, ProviderConfig)> {
        let mut ids = self.providers.lock().keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids.into_iter()
            .map(|id| {
                let config = ProviderConfig::new(format!("fake-{id}"));
                (id, config)
            })
            .collect()
    }
}

#[async_trait]
impl ProviderConnector for FakeConnector {
    async fn connect(
        &self,
        provider_id: &str,
        _config: &ProviderConfig,
    ) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        *self
            .connects
            .lock()
            .entry(provider_id.to_string())
            .or_default() += 1;
        if self.refusing.lock().contains(provider_id) {
            return Err(ProviderError::Transport(format!(
                "connection to {provider_id} refused"
            )));
        }
        let provider = self
            .providers
            .lock()
            .get(provider_id)
            .cloned()
            .ok_or_else(|| ProviderError::Transport(format!("no such process {provider_id}")))?;
        Ok(provider)
    }
}
