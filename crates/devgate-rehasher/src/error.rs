//! Error types for building a rehasher.

use thiserror::Error;

/// Errors returned by [`RehasherBuilder::build`](crate::RehasherBuilder::build).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RehashError {
    /// A rehasher must watch at least one service.
    #[error("no services to watch")]
    NoServices,

    /// No way to tell which instances belong to this process.
    #[error("no registration check configured")]
    NoRegistration,
}

/// Result type for rehasher construction.
pub type Result<T> = std::result::Result<T, RehashError>;
