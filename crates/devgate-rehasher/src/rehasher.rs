//! The rehash control loop.

use std::any::Any;
use std::backtrace::Backtrace;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use devgate_device::{CloseReason, Device, Registry};
use devgate_discovery::{
    Accessor, AccessorError, AccessorFactory, ConsistentAccessorFactory, Environment, Event,
    Listener,
};
use devgate_metrics::{
    RehashMetrics, DISCONNECT_ALL_SD_ERROR, DISCONNECT_ALL_SD_NO_INSTANCES,
    DISCONNECT_ALL_SD_STOPPED,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{RehashError, Result};

/// Close text for a device whose owner is another instance.
pub const REHASH_OTHER_INSTANCE: &str = "rehash-other-instance";

type IsRegistered = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Why every device was disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectAllReason {
    /// The discovery backend reported an error.
    ServiceDiscoveryError,
    /// The discovery feed stopped.
    ServiceDiscoveryStopped,
    /// The discovery feed reported no instances.
    NoInstances,
}

impl DisconnectAllReason {
    /// The close text given to each device.
    #[must_use]
    pub const fn text(&self) -> &'static str {
        match self {
            Self::ServiceDiscoveryError => "sd-error",
            Self::ServiceDiscoveryStopped => "sd-stopped",
            Self::NoInstances => "sd-no-instances",
        }
    }

    /// The `reason` label on the disconnect-all counter.
    #[must_use]
    pub const fn metric_label(&self) -> &'static str {
        match self {
            Self::ServiceDiscoveryError => DISCONNECT_ALL_SD_ERROR,
            Self::ServiceDiscoveryStopped => DISCONNECT_ALL_SD_STOPPED,
            Self::NoInstances => DISCONNECT_ALL_SD_NO_INSTANCES,
        }
    }
}

impl fmt::Display for DisconnectAllReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Outcome of one rehash pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RehashReport {
    /// Devices that stay on this instance.
    pub keep: usize,
    /// Devices disconnected because another instance owns them.
    pub disconnect: usize,
    /// Devices whose owner could not be determined; counted in `keep` too.
    pub errors: usize,
    /// How long the pass took.
    pub duration: Duration,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
}

enum Ownership {
    Mine,
    Other(String),
    Unknown,
}

/// Builder for a [`Rehasher`].
pub struct RehasherBuilder {
    registry: Arc<Registry>,
    services: BTreeSet<String>,
    is_registered: Option<IsRegistered>,
    accessor_factory: Arc<dyn AccessorFactory>,
    metrics: RehashMetrics,
}

impl RehasherBuilder {
    /// Watches `service`.
    #[must_use]
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.services.insert(service.into());
        self
    }

    /// Takes services, registrations and the accessor factory from `environment`.
    #[must_use]
    pub fn environment(mut self, environment: &Environment) -> Self {
        self.services.extend(environment.services());
        self.accessor_factory = environment.accessor_factory();
        let environment = environment.clone();
        self.is_registered = Some(Arc::new(move |instance: &str| {
            environment.is_registered(instance)
        }));
        self
    }

    /// Sets the check for whether an instance is this process.
    #[must_use]
    pub fn is_registered<F>(mut self, is_registered: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.is_registered = Some(Arc::new(is_registered));
        self
    }

    /// Sets the accessor factory used for membership snapshots.
    #[must_use]
    pub fn accessor_factory(mut self, factory: Arc<dyn AccessorFactory>) -> Self {
        self.accessor_factory = factory;
        self
    }

    /// Records pass results in `metrics`.
    #[must_use]
    pub fn metrics(mut self, metrics: RehashMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Builds the rehasher.
    ///
    /// # Errors
    ///
    /// Returns an error if no services or no registration check are configured.
    pub fn build(self) -> Result<Rehasher> {
        if self.services.is_empty() {
            return Err(RehashError::NoServices);
        }
        let is_registered = self.is_registered.ok_or(RehashError::NoRegistration)?;

        Ok(Rehasher {
            registry: self.registry,
            services: self.services,
            is_registered,
            accessor_factory: self.accessor_factory,
            metrics: self.metrics,
            pass: Mutex::new(()),
        })
    }
}

impl fmt::Debug for RehasherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RehasherBuilder")
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

/// Disconnects devices that another gateway instance now owns.
///
/// Passes run one at a time; a snapshot arriving mid-pass waits for the
/// current pass to finish. Devices connected during a pass may be left for
/// the next one.
pub struct Rehasher {
    registry: Arc<Registry>,
    services: BTreeSet<String>,
    is_registered: IsRegistered,
    accessor_factory: Arc<dyn AccessorFactory>,
    metrics: RehashMetrics,
    pass: Mutex<()>,
}

impl Rehasher {
    /// Starts building a rehasher over `registry`.
    #[must_use]
    pub fn builder(registry: Arc<Registry>) -> RehasherBuilder {
        RehasherBuilder {
            registry,
            services: BTreeSet::new(),
            is_registered: None,
            accessor_factory: Arc::new(ConsistentAccessorFactory::default()),
            metrics: RehashMetrics::default(),
        }
    }

    /// The services this rehasher reacts to.
    #[must_use]
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(String::as_str)
    }

    /// Evaluates every connected device against `accessor`.
    ///
    /// Devices owned by another instance are closed and removed. A lookup
    /// error or a panic while evaluating one device keeps that device and the
    /// pass moves on.
    pub fn rehash(&self, service: &str, accessor: &dyn Accessor) -> RehashReport {
        let _pass = self.pass.lock();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(service, "rehash starting");

        let mut keep = 0;
        let mut disconnect = 0;
        let mut errors = 0;

        self.registry.visit_all(|device| match self.ownership(device, accessor) {
            Ownership::Mine => keep += 1,
            Ownership::Other(instance) => {
                info!(
                    service,
                    device_id = %device.id(),
                    session_id = %device.session_id(),
                    instance = %instance,
                    "disconnecting device owned by another instance"
                );
                self.registry
                    .disconnect_device(device, CloseReason::rehash(REHASH_OTHER_INSTANCE));
                disconnect += 1;
            }
            Ownership::Unknown => {
                keep += 1;
                errors += 1;
            }
        });

        let duration = start.elapsed();
        self.metrics.set_keep(service, keep as u64);
        self.metrics.set_disconnect(service, disconnect as u64);
        self.metrics.set_timestamp(service, started_at);
        self.metrics.set_duration(service, duration);

        info!(
            service,
            keep,
            disconnect,
            errors,
            duration_ms = duration.as_millis() as u64,
            "rehash complete"
        );

        RehashReport {
            keep,
            disconnect,
            errors,
            duration,
            started_at,
        }
    }

    /// Closes and removes every connected device. Returns how many were removed.
    pub fn disconnect_all(&self, service: &str, reason: DisconnectAllReason) -> usize {
        let _pass = self.pass.lock();
        self.metrics
            .inc_disconnect_all(service, reason.metric_label());
        let count = self
            .registry
            .disconnect_all(&CloseReason::disconnect_all(reason.text()));
        error!(service, reason = %reason, count, "disconnected all devices");
        count
    }

    fn ownership(&self, device: &Device, accessor: &dyn Accessor) -> Ownership {
        let outcome = panic::catch_unwind(AssertUnwindSafe(
            || -> std::result::Result<(String, bool), AccessorError> {
                let instance = accessor.get(device.id().as_bytes())?;
                let mine = (self.is_registered)(&instance);
                Ok((instance, mine))
            },
        ));

        match outcome {
            Ok(Ok((_, true))) => Ownership::Mine,
            Ok(Ok((instance, false))) => Ownership::Other(instance),
            Ok(Err(e)) => {
                warn!(
                    device_id = %device.id(),
                    error = %e,
                    "unable to determine owning instance; keeping device"
                );
                Ownership::Unknown
            }
            Err(payload) => {
                error!(
                    device_id = %device.id(),
                    panic = %panic_message(payload.as_ref()),
                    backtrace = %Backtrace::force_capture(),
                    "recovered from panic during rehash; keeping device"
                );
                Ownership::Unknown
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Listener for Rehasher {
    fn monitor_event(&self, event: &Event) {
        if !self.services.contains(&event.service) {
            debug!(service = %event.service, "ignoring event for unwatched service");
            return;
        }

        if let Some(e) = &event.error {
            error!(service = %event.service, error = %e, "service discovery error");
            self.disconnect_all(&event.service, DisconnectAllReason::ServiceDiscoveryError);
        } else if event.stopped {
            error!(service = %event.service, "service discovery stopped");
            self.disconnect_all(&event.service, DisconnectAllReason::ServiceDiscoveryStopped);
        } else if event.instances.is_empty() {
            error!(service = %event.service, "service discovery reported no instances");
            self.disconnect_all(&event.service, DisconnectAllReason::NoInstances);
        } else {
            let accessor = self.accessor_factory.create(&event.instances);
            self.rehash(&event.service, accessor.as_ref());
        }
    }
}

impl fmt::Debug for Rehasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rehasher")
            .field("services", &self.services)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
