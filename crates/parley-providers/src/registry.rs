//! Registry of provider connections and their discovered capabilities.

use crate::client::{ProviderClient, ProviderConnector};
use crate::schema::validate_arguments;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::RwLock;
use parley_config::{ParleyConfig, ProviderConfig};
use parley_protocol::{
    Capability, CapabilityKind, CapabilityRef, InvocationResult, ProviderError, ProviderStatus,
    ProviderSummary,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default ceiling for a single provider call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-provider connection state.
struct ProviderEntry {
    config: ProviderConfig,
    status: ProviderStatus,
    client: Option<Arc<dyn ProviderClient>>,
    /// Replaced wholesale on every discovery.
    capabilities: Arc<Vec<Capability>>,
    last_error: Option<String>,
    connected_at: Option<DateTime<Utc>>,
}

impl ProviderEntry {
    fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            status: ProviderStatus::Closed,
            client: None,
            capabilities: Arc::new(Vec::new()),
            last_error: None,
            connected_at: None,
        }
    }

    fn summary(&self, id: &str) -> ProviderSummary {
        ProviderSummary {
            id: id.to_string(),
            status: self.status,
            capabilities: self.capabilities.len(),
            last_error: self.last_error.clone(),
            connected_at: self.connected_at,
        }
    }
}

/// Launches providers, caches their capabilities, and routes invocations.
#[derive(Clone)]
pub struct ProviderRegistry {
    connector: Arc<dyn ProviderConnector>,
    entries: Arc<RwLock<BTreeMap<String, ProviderEntry>>>,
    /// Serializes connect, reconnect, and shutdown.
    lifecycle: Arc<Mutex<()>>,
    call_timeout: Duration,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new(connector: Arc<dyn ProviderConnector>, call_timeout: Duration) -> Self {
        Self {
            connector,
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            lifecycle: Arc::new(Mutex::new(())),
            call_timeout,
        }
    }

    /// Create a registry with every enabled provider from config registered but not connected.
    pub fn from_config(config: &ParleyConfig, connector: Arc<dyn ProviderConnector>) -> Self {
        let registry = Self::new(
            connector,
            Duration::from_secs(config.orchestrator.tool_timeout_secs),
        );
        {
            let mut entries = registry.entries.write();
            for (id, provider) in config.enabled_providers() {
                entries.insert(id.clone(), ProviderEntry::new(provider.clone()));
            }
        }
        registry
    }

    /// Timeout applied to each invocation.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Connect every registered provider that is not already ready.
    ///
    /// Failures are recorded on the provider and do not stop the others.
    pub async fn connect_all(&self) -> Vec<ProviderSummary> {
        let ids = self.entries.read().keys().cloned().collect::<Vec<_>>();
        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.reconnect(&id).await {
                Ok(summary) => summaries.push(summary),
                Err(err) => {
                    warn!("provider failed to connect (provider_id={}, err={})", id, err);
                    if let Some(summary) = self.summary(&id) {
                        summaries.push(summary);
                    }
                }
            }
        }
        summaries
    }

    /// Register (or replace) a provider and connect it.
    pub async fn connect(
        &self,
        provider_id: &str,
        config: ProviderConfig,
    ) -> Result<ProviderSummary, ProviderError> {
        let _guard = self.lifecycle.lock().await;
        let previous = {
            let mut entries = self.entries.write();
            entries
                .insert(provider_id.to_string(), ProviderEntry::new(config))
                .and_then(|entry| entry.client)
        };
        if let Some(client) = previous {
            client.close().await;
        }
        self.establish(provider_id).await
    }

    /// Bring a provider back to ready. No-op when it already is.
    pub async fn reconnect(&self, provider_id: &str) -> Result<ProviderSummary, ProviderError> {
        let _guard = self.lifecycle.lock().await;
        let stale = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(provider_id)
                .ok_or_else(|| ProviderError::NotFound(format!("provider {provider_id}")))?;
            if entry.status == ProviderStatus::Ready {
                debug!("provider already ready (provider_id={})", provider_id);
                return Ok(entry.summary(provider_id));
            }
            entry.client.take()
        };
        if let Some(client) = stale {
            client.close().await;
        }
        self.establish(provider_id).await
    }

    /// Close every connection. Capabilities are dropped with them.
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        let clients = {
            let mut entries = self.entries.write();
            entries
                .iter_mut()
                .filter_map(|(id, entry)| {
                    entry.status = ProviderStatus::Closed;
                    entry.capabilities = Arc::new(Vec::new());
                    entry.client.take().map(|client| (id.clone(), client))
                })
                .collect::<Vec<_>>()
        };
        for (id, client) in clients {
            debug!("closing provider (provider_id={})", id);
            client.close().await;
        }
    }

    /// Status summaries for every registered provider, in id order.
    pub fn summaries(&self) -> Vec<ProviderSummary> {
        self.entries
            .read()
            .iter()
            .map(|(id, entry)| entry.summary(id))
            .collect()
    }

    pub fn summary(&self, provider_id: &str) -> Option<ProviderSummary> {
        self.entries
            .read()
            .get(provider_id)
            .map(|entry| entry.summary(provider_id))
    }

    /// Capabilities from ready providers, optionally filtered by kind.
    pub fn list_capabilities(&self, kind: Option<CapabilityKind>) -> Vec<Capability> {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.status == ProviderStatus::Ready)
            .flat_map(|entry| entry.capabilities.iter())
            .filter(|capability| kind.is_none_or(|kind| capability.kind == kind))
            .cloned()
            .collect()
    }

    /// Resolve a capability name to a qualified reference.
    ///
    /// With a provider the lookup is exact. Without one the name must be
    /// unique across ready providers.
    pub fn resolve(
        &self,
        kind: CapabilityKind,
        name: &str,
        provider_id: Option<&str>,
    ) -> Result<CapabilityRef, ProviderError> {
        if let Some(provider_id) = provider_id {
            let reference = CapabilityRef::new(provider_id, kind, name);
            self.lookup(&reference)?;
            return Ok(reference);
        }
        let mut matches = self
            .list_capabilities(Some(kind))
            .into_iter()
            .filter(|capability| capability.name == name)
            .map(|capability| capability.reference());
        match (matches.next(), matches.next()) {
            (Some(reference), None) => Ok(reference),
            (Some(first), Some(second)) => Err(ProviderError::Ambiguous(format!(
                "{} '{}' is offered by {} and {}",
                kind.as_str(),
                name,
                first.provider_id,
                second.provider_id
            ))),
            (None, _) => Err(ProviderError::NotFound(format!("{} '{}'", kind.as_str(), name))),
        }
    }

    /// Invoke a capability on its owning provider.
    ///
    /// Arguments are checked against the cached schema first. A transport
    /// failure marks the provider degraded; later calls fail fast until
    /// it is reconnected.
    pub async fn invoke(
        &self,
        reference: &CapabilityRef,
        arguments: Value,
    ) -> Result<InvocationResult, ProviderError> {
        let (client, capability) = self.lookup(reference)?;
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        validate_arguments(&capability.input_schema, &arguments)
            .map_err(|reason| ProviderError::InvalidArguments(format!("{reference}: {reason}")))?;

        debug!(
            "invoking capability (provider_id={}, kind={}, name={})",
            reference.provider_id,
            reference.kind.as_str(),
            reference.name
        );
        let result = self
            .with_timeout(
                &reference.provider_id,
                client.invoke(reference.kind, &reference.name, arguments),
            )
            .await;
        if let Err(ProviderError::Transport(message)) = &result {
            self.mark_degraded(&reference.provider_id, &client, message);
        }
        result
    }

    /// Read a resource by uri, optionally pinned to one provider.
    pub async fn fetch_resource(
        &self,
        uri: &str,
        provider_id: Option<&str>,
    ) -> Result<(CapabilityRef, InvocationResult), ProviderError> {
        let reference = self.resolve(CapabilityKind::Resource, uri, provider_id)?;
        let result = self.invoke(&reference, Value::Null).await?;
        Ok((reference, result))
    }

    /// Render a prompt with arguments, optionally pinned to one provider.
    pub async fn execute_prompt(
        &self,
        name: &str,
        arguments: Value,
        provider_id: Option<&str>,
    ) -> Result<(CapabilityRef, InvocationResult), ProviderError> {
        let reference = self.resolve(CapabilityKind::Prompt, name, provider_id)?;
        let result = self.invoke(&reference, arguments).await?;
        Ok((reference, result))
    }

    fn lookup(
        &self,
        reference: &CapabilityRef,
    ) -> Result<(Arc<dyn ProviderClient>, Capability), ProviderError> {
        let entries = self.entries.read();
        let entry = entries
            .get(&reference.provider_id)
            .ok_or_else(|| ProviderError::NotFound(format!("provider {}", reference.provider_id)))?;
        let client = match (&entry.client, entry.status) {
            (Some(client), ProviderStatus::Ready) => client.clone(),
            (_, status) => {
                return Err(ProviderError::Unavailable(format!(
                    "{} is {}",
                    reference.provider_id,
                    status.as_str()
                )));
            }
        };
        let capability = entry
            .capabilities
            .iter()
            .find(|capability| capability.matches(reference))
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(reference.to_string()))?;
        Ok((client, capability))
    }

    /// Connect and discover. Caller holds the lifecycle lock.
    async fn establish(&self, provider_id: &str) -> Result<ProviderSummary, ProviderError> {
        let config = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(provider_id)
                .ok_or_else(|| ProviderError::NotFound(format!("provider {provider_id}")))?;
            entry.status = ProviderStatus::Connecting;
            entry.capabilities = Arc::new(Vec::new());
            entry.config.clone()
        };

        let client = match self
            .with_timeout(provider_id, self.connector.connect(provider_id, &config))
            .await
        {
            Ok(client) => client,
            Err(err) => {
                self.mark_closed(provider_id, &err);
                return Err(err);
            }
        };
        let capabilities = match self.with_timeout(provider_id, client.discover()).await {
            Ok(capabilities) => capabilities,
            Err(err) => {
                client.close().await;
                self.mark_closed(provider_id, &err);
                return Err(err);
            }
        };
        let capabilities = capabilities
            .into_iter()
            .map(|mut capability| {
                capability.provider_id = provider_id.to_string();
                capability
            })
            .collect::<Vec<_>>();

        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(provider_id)
            .ok_or_else(|| ProviderError::NotFound(format!("provider {provider_id}")))?;
        entry.status = ProviderStatus::Ready;
        entry.capabilities = Arc::new(capabilities);
        entry.client = Some(client);
        entry.last_error = None;
        entry.connected_at = Some(Utc::now());
        info!(
            "provider ready (provider_id={}, capabilities={})",
            provider_id,
            entry.capabilities.len()
        );
        Ok(entry.summary(provider_id))
    }

    async fn with_timeout<T>(
        &self,
        provider_id: &str,
        future: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        match tokio::time::timeout(self.call_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider_id: provider_id.to_string(),
                after_secs: self.call_timeout.as_secs(),
            }),
        }
    }

    fn mark_closed(&self, provider_id: &str, err: &ProviderError) {
        warn!(
            "provider connection failed (provider_id={}, err={})",
            provider_id, err
        );
        if let Some(entry) = self.entries.write().get_mut(provider_id) {
            entry.status = ProviderStatus::Closed;
            entry.client = None;
            entry.last_error = Some(err.to_string());
        }
    }

    fn mark_degraded(&self, provider_id: &str, client: &Arc<dyn ProviderClient>, message: &str) {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(provider_id) else {
            return;
        };
        // A reconnect may already have swapped the client.
        let current = entry
            .client
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, client));
        if current && entry.status == ProviderStatus::Ready {
            warn!(
                "provider degraded (provider_id={}, err={})",
                provider_id, message
            );
            entry.status = ProviderStatus::Degraded;
            entry.last_error = Some(message.to_string());
        }
    }
}
