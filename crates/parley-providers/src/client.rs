//! Connection seam between the registry and provider transports.

use async_trait::async_trait;
use parley_config::ProviderConfig;
use parley_protocol::{Capability, CapabilityKind, InvocationResult, ProviderError};
use serde_json::Value;
use std::sync::Arc;

/// A live connection to one provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Enumerate the tools, prompts, and resources the provider exposes.
    async fn discover(&self) -> Result<Vec<Capability>, ProviderError>;

    /// Invoke a capability by kind and name (or uri for resources).
    async fn invoke(
        &self,
        kind: CapabilityKind,
        name: &str,
        arguments: Value,
    ) -> Result<InvocationResult, ProviderError>;

    /// Tear the connection down. Safe to call more than once.
    async fn close(&self);
}

/// Factory that starts or attaches to a provider process.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(
        &self,
        provider_id: &str,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn ProviderClient>, ProviderError>;
}
