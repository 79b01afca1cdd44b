//! Error types for the gateway binary.

use std::path::PathBuf;

use devgate_device::RegistryError;
use devgate_discovery::DiscoveryError;
use devgate_rehasher::RehashError;
use thiserror::Error;

/// Errors raised while configuring or running the gateway.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A configuration file could not be read or written.
    #[error("failed to access {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// Failed to serialize or deserialize configuration.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Service discovery could not be set up.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The rehasher could not be built.
    #[error(transparent)]
    Rehash(#[from] RehashError),

    /// A device could not be registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for gateway operations.
pub type ServerResult<T> = Result<T, ServerError>;
