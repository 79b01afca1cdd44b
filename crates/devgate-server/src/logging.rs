//! Log subscriber installation.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::config::LogConfig;
use crate::error::{ServerError, ServerResult};

/// Builds the filter: `RUST_LOG` when set, otherwise the configured level.
///
/// # Errors
///
/// Returns [`ServerError::Config`] if the configured directive is invalid.
pub fn filter(config: &LogConfig) -> ServerResult<EnvFilter> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(&config.level)
            .map_err(|e| ServerError::Config(format!("invalid log level '{}': {e}", config.level)))
    })
}

/// Installs the global subscriber with a plain or JSON formatter.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a subscriber is already set.
pub fn init(config: &LogConfig) -> ServerResult<()> {
    let registry = tracing_subscriber::registry().with(filter(config)?);
    let installed = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.map_err(|e| ServerError::Config(format!("failed to install logging: {e}")))
}
