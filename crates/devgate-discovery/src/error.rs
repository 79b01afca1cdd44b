//! Error types for service discovery.

use thiserror::Error;

/// Errors returned by a consistent-hash [`Accessor`](crate::Accessor).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessorError {
    /// The accessor was built from an empty instance list.
    #[error("no instances available")]
    NoInstances,

    /// The key cannot be hashed to an instance.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Any other lookup failure.
    #[error("lookup failed: {0}")]
    Lookup(String),
}

/// Errors that can occur while configuring service discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Neither fixed instances nor a backend were configured.
    #[error("no service discovery configured")]
    NoServiceDiscovery,

    /// An instance string could not be normalized.
    #[error("invalid instance: {0}")]
    InvalidInstance(String),

    /// The discovery backend failed.
    #[error("service discovery backend error: {0}")]
    Backend(String),
}

/// Result type for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessor_error_display() {
        assert_eq!(AccessorError::NoInstances.to_string(), "no instances available");
        assert!(AccessorError::InvalidKey("empty".to_string())
            .to_string()
            .contains("empty"));
    }

    #[test]
    fn test_discovery_error_display() {
        assert_eq!(
            DiscoveryError::NoServiceDiscovery.to_string(),
            "no service discovery configured"
        );
        assert!(DiscoveryError::Backend("zk session expired".to_string())
            .to_string()
            .contains("zk session expired"));
    }
}
