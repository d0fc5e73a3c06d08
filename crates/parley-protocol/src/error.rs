//! Provider failure taxonomy shared by the registry and the orchestrator.

use serde::{Deserialize, Serialize};

/// Errors returned by provider invocation and capability lookup.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// The provider did not answer before the invocation timeout.
    #[error("provider {provider_id} timed out after {after_secs}s")]
    Timeout { provider_id: String, after_secs: u64 },
    /// The transport to the provider process failed.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The provider answered with an application-level error.
    #[error("rejected by provider: {0}")]
    Rejected(String),
    /// Arguments did not match the cached input schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// The owning connection is not ready.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// No capability or provider matches the reference.
    #[error("not found: {0}")]
    NotFound(String),
    /// An unqualified reference matched more than one provider.
    #[error("ambiguous reference: {0}")]
    Ambiguous(String),
}

impl ProviderError {
    /// Fold the error onto the three failure classes callers react to.
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::Timeout { .. } => ProviderErrorKind::Timeout,
            ProviderError::Transport(_) | ProviderError::Unavailable(_) => {
                ProviderErrorKind::Transport
            }
            ProviderError::Rejected(_)
            | ProviderError::InvalidArguments(_)
            | ProviderError::NotFound(_)
            | ProviderError::Ambiguous(_) => ProviderErrorKind::Rejected,
        }
    }
}

/// Coarse classification of a provider failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    Transport,
    Rejected,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Transport => "transport",
            ProviderErrorKind::Rejected => "rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ProviderError, ProviderErrorKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn errors_fold_onto_kinds() {
        let timeout = ProviderError::Timeout {
            provider_id: "calc".to_string(),
            after_secs: 5,
        };
        assert_eq!(timeout.kind(), ProviderErrorKind::Timeout);
        assert_eq!(
            ProviderError::Unavailable("calc".to_string()).kind(),
            ProviderErrorKind::Transport
        );
        assert_eq!(
            ProviderError::InvalidArguments("a".to_string()).kind(),
            ProviderErrorKind::Rejected
        );
        assert_eq!(timeout.to_string(), "provider calc timed out after 5s");
    }
}
