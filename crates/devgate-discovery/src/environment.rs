//! Service discovery environment: where instances come from and who we are.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::accessor::{AccessorFactory, ConsistentAccessorFactory, DEFAULT_VNODE_COUNT};
use crate::error::{DiscoveryError, Result};
use crate::instancer::{FixedInstancer, Instancer};
use crate::types::{normalize_instance, DEFAULT_SCHEME};

/// Service key used for a fixed instance list.
pub const FIXED_SERVICE: &str = "fixed";

fn default_vnode_count() -> usize {
    DEFAULT_VNODE_COUNT
}

fn default_scheme() -> String {
    DEFAULT_SCHEME.to_string()
}

/// Service discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Virtual nodes per instance on the consistent-hash ring.
    #[serde(default = "default_vnode_count")]
    pub vnode_count: usize,
    /// Scheme applied to instances that do not carry one.
    #[serde(default = "default_scheme")]
    pub default_scheme: String,
    /// A fixed set of instances; when non-empty no backend is consulted.
    #[serde(default)]
    pub fixed: Vec<String>,
    /// The instances this process is registered as.
    #[serde(default)]
    pub registrations: Vec<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            vnode_count: DEFAULT_VNODE_COUNT,
            default_scheme: DEFAULT_SCHEME.to_string(),
            fixed: Vec::new(),
            registrations: Vec::new(),
        }
    }
}

impl DiscoveryOptions {
    /// Sets the fixed instance list.
    #[must_use]
    pub fn with_fixed<I, S>(mut self, instances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fixed = instances.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the instances this process is registered as.
    #[must_use]
    pub fn with_registrations<I, S>(mut self, instances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registrations = instances.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the virtual node count.
    #[must_use]
    pub const fn with_vnode_count(mut self, vnode_count: usize) -> Self {
        self.vnode_count = vnode_count;
        self
    }
}

/// Builds an [`Environment`] for an external discovery backend.
///
/// Backends such as Consul or Zookeeper are supplied by the caller; the
/// factory receives the base environment (accessor factory, scheme and
/// registrations already applied) and adds its instancers.
pub trait BackendFactory: Send + Sync {
    /// Creates the backend environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached or configured.
    fn new_environment(&self, options: &DiscoveryOptions, base: Environment) -> Result<Environment>;
}

/// Everything the gateway needs from service discovery.
#[derive(Clone)]
pub struct Environment {
    instancers: BTreeMap<String, Arc<dyn Instancer>>,
    accessor_factory: Arc<dyn AccessorFactory>,
    default_scheme: String,
    registered: HashSet<String>,
}

impl Environment {
    /// Creates an empty environment with the default accessor factory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            instancers: BTreeMap::new(),
            accessor_factory: Arc::new(ConsistentAccessorFactory::default()),
            default_scheme: DEFAULT_SCHEME.to_string(),
            registered: HashSet::new(),
        }
    }

    /// Builds an environment from options.
    ///
    /// A non-empty fixed list wins; otherwise `backend` is used.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::NoServiceDiscovery`] if neither is available,
    /// or an error if a fixed instance or registration is invalid.
    pub fn from_options(
        options: &DiscoveryOptions,
        backend: Option<&dyn BackendFactory>,
    ) -> Result<Self> {
        let mut base = Self::new()
            .with_accessor_factory(Arc::new(ConsistentAccessorFactory::new(options.vnode_count)))
            .with_default_scheme(options.default_scheme.clone());

        for registration in &options.registrations {
            base = base.with_registered(normalize_instance(&options.default_scheme, registration)?);
        }

        if !options.fixed.is_empty() {
            let fixed = options
                .fixed
                .iter()
                .map(|instance| normalize_instance(&options.default_scheme, instance))
                .collect::<Result<Vec<_>>>()?;
            info!(instances = ?fixed, "using a fixed set of instances for service discovery");
            return Ok(base.with_instancer(FIXED_SERVICE, Arc::new(FixedInstancer::new(fixed))));
        }

        match backend {
            Some(factory) => {
                info!("using an external backend for service discovery");
                factory.new_environment(options, base)
            }
            None => Err(DiscoveryError::NoServiceDiscovery),
        }
    }

    /// Adds an instancer for a service.
    #[must_use]
    pub fn with_instancer(mut self, service: impl Into<String>, instancer: Arc<dyn Instancer>) -> Self {
        self.instancers.insert(service.into(), instancer);
        self
    }

    /// Replaces the accessor factory.
    #[must_use]
    pub fn with_accessor_factory(mut self, factory: Arc<dyn AccessorFactory>) -> Self {
        self.accessor_factory = factory;
        self
    }

    /// Sets the default scheme.
    #[must_use]
    pub fn with_default_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.default_scheme = scheme.into();
        self
    }

    /// Marks an instance as belonging to this process.
    #[must_use]
    pub fn with_registered(mut self, instance: impl Into<String>) -> Self {
        self.registered.insert(instance.into());
        self
    }

    /// Returns the instancers keyed by service name.
    #[must_use]
    pub fn instancers(&self) -> &BTreeMap<String, Arc<dyn Instancer>> {
        &self.instancers
    }

    /// Returns the service names this environment watches.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        self.instancers.keys().cloned().collect()
    }

    /// Returns the accessor factory.
    #[must_use]
    pub fn accessor_factory(&self) -> Arc<dyn AccessorFactory> {
        Arc::clone(&self.accessor_factory)
    }

    /// Returns the default scheme.
    #[must_use]
    pub fn default_scheme(&self) -> &str {
        &self.default_scheme
    }

    /// Returns true if `instance` is one of this process's registrations.
    #[must_use]
    pub fn is_registered(&self, instance: &str) -> bool {
        if self.registered.contains(instance) {
            return true;
        }
        normalize_instance(&self.default_scheme, instance)
            .is_ok_and(|normalized| self.registered.contains(&normalized))
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("services", &self.instancers.keys().collect::<Vec<_>>())
            .field("default_scheme", &self.default_scheme)
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}
