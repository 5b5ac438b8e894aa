//! Error types for the failover core

use thiserror::Error;

/// Result alias for orchestrator operations
pub type FailoverResult<T> = std::result::Result<T, FailoverError>;

/// Result alias for calls into a single provider adapter
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Errors surfaced by the failover orchestrator to its callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailoverError {
    /// The orchestrator was constructed without any provider
    #[error("no providers configured")]
    EmptyProviderList,

    /// Single-shot readings requested from an adapter that cannot serve them
    #[error("provider '{adapter}' does not support single-shot updates")]
    UnsupportedMode { adapter: String },

    /// Every provider in the list has failed; terminal for the orchestrator
    #[error("no providers available ({attempted} attempted)")]
    NoProvidersAvailable { attempted: usize },

    /// The current adapter rejected a call
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// The orchestrator task has stopped and no longer accepts commands
    #[error("orchestrator is shut down")]
    Closed,
}

impl FailoverError {
    /// Configuration errors are reported synchronously and never retried
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FailoverError::EmptyProviderList
                | FailoverError::UnsupportedMode { .. }
                | FailoverError::Adapter(AdapterError::UnsupportedMode { .. })
        )
    }

    /// Check whether this is the terminal exhaustion error
    pub fn is_exhausted(&self) -> bool {
        matches!(self, FailoverError::NoProvidersAvailable { .. })
    }
}

/// Errors reported by a provider adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The adapter has no implementation for this operation
    #[error("provider '{adapter}' does not support {operation}")]
    Unsupported { adapter: String, operation: String },

    /// The adapter cannot serve single-shot requests
    #[error("provider '{adapter}' does not support single-shot updates")]
    UnsupportedMode { adapter: String },

    /// The backend refused the call
    #[error("provider '{adapter}' rejected the request: {message}")]
    Rejected { adapter: String, message: String },

    /// The backend is not connected
    #[error("provider '{adapter}' is not connected")]
    NotConnected { adapter: String },
}

impl AdapterError {
    /// Name of the adapter that produced this error
    pub fn adapter(&self) -> &str {
        match self {
            AdapterError::Unsupported { adapter, .. }
            | AdapterError::UnsupportedMode { adapter }
            | AdapterError::Rejected { adapter, .. }
            | AdapterError::NotConnected { adapter } => adapter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(FailoverError::EmptyProviderList.is_configuration());
        assert!(FailoverError::UnsupportedMode {
            adapter: "fused".to_string()
        }
        .is_configuration());
        assert!(!FailoverError::NoProvidersAvailable { attempted: 2 }.is_configuration());
        assert!(FailoverError::NoProvidersAvailable { attempted: 2 }.is_exhausted());
    }

    #[test]
    fn test_adapter_error_conversion() {
        let err: FailoverError = AdapterError::Rejected {
            adapter: "gms".to_string(),
            message: "quota".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "provider 'gms' rejected the request: quota"
        );
        if let FailoverError::Adapter(inner) = err {
            assert_eq!(inner.adapter(), "gms");
        } else {
            panic!("expected adapter error");
        }
    }
}
