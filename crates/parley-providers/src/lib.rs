//! Provider registry: launches capability providers, discovers what they
//! offer, and routes invocations to them.

pub mod client;
pub mod mcp;
pub mod registry;
pub mod schema;

pub use client::{ProviderClient, ProviderConnector};
pub use mcp::{McpClient, McpConnector};
pub use registry::{DEFAULT_CALL_TIMEOUT, ProviderRegistry};
pub use schema::validate_arguments;
