//! Runtime wiring: metrics, registry, health, rehasher and discovery monitor.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use devgate_device::{
    CloseReason, Device, DeviceError, DeviceOptions, HealthDispatcher, HealthListener,
    HealthMonitor, HealthStats, Id, Registry, TransportSink,
};
use devgate_discovery::{BackendFactory, Environment, Listener, MetricsListener, Monitor};
use devgate_metrics::PrometheusRegistry;
use devgate_rehasher::Rehasher;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::ServerResult;

/// Close text used for devices still connected when the gateway stops.
pub const GATEWAY_SHUTDOWN: &str = "gateway-shutdown";

/// Close text used when the connection owner drops a device.
pub const CONNECTION_CLOSED: &str = "connection-closed";

/// A point-in-time view of the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    /// Configured service name.
    pub service: String,
    /// Devices currently registered.
    pub devices: usize,
    /// Health counters.
    pub health: HealthStats,
}

/// The device gateway.
///
/// Owns the device registry and keeps it consistent with service discovery:
/// the rehasher listens to the discovery monitor and disconnects devices that
/// belong to another instance.
pub struct Gateway {
    config: GatewayConfig,
    metrics: PrometheusRegistry,
    registry: Arc<Registry>,
    health: Arc<HealthMonitor>,
    environment: Environment,
    rehasher: Arc<Rehasher>,
    monitor: Mutex<Option<Monitor>>,
}

impl Gateway {
    /// Builds a gateway, taking service discovery from the configuration or `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, no service discovery
    /// is available, or the rehasher cannot be built.
    pub fn new(config: GatewayConfig, backend: Option<&dyn BackendFactory>) -> ServerResult<Self> {
        config.validate()?;
        let environment = Environment::from_options(&config.discovery, backend)?;
        Self::with_environment(config, environment)
    }

    /// Builds a gateway around an already constructed environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the environment
    /// has no services to watch.
    pub fn with_environment(config: GatewayConfig, environment: Environment) -> ServerResult<Self> {
        config.validate()?;

        let metrics = PrometheusRegistry::new();
        let health = Arc::new(HealthMonitor::new());
        let registry = Arc::new(
            Registry::new()
                .with_max_devices(config.device.max_devices)
                .with_metrics(metrics.device_metrics().clone())
                .with_listener(Arc::new(HealthListener::new(
                    Arc::clone(&health) as Arc<dyn HealthDispatcher>
                ))),
        );
        let rehasher = Arc::new(
            Rehasher::builder(Arc::clone(&registry))
                .environment(&environment)
                .metrics(metrics.rehash_metrics().clone())
                .build()?,
        );

        Ok(Self {
            config,
            metrics,
            registry,
            health,
            environment,
            rehasher,
            monitor: Mutex::new(None),
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The device registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The metric families.
    #[must_use]
    pub const fn metrics(&self) -> &PrometheusRegistry {
        &self.metrics
    }

    /// The rehasher driven by service discovery.
    #[must_use]
    pub fn rehasher(&self) -> &Arc<Rehasher> {
        &self.rehasher
    }

    /// Current health counters.
    #[must_use]
    pub fn health(&self) -> HealthStats {
        self.health.snapshot()
    }

    /// A status summary suitable for logging.
    #[must_use]
    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            service: self.config.service_name.clone(),
            devices: self.registry.len(),
            health: self.health(),
        }
    }

    /// Starts watching service discovery. Returns false if already started.
    pub fn start(&self) -> bool {
        let mut slot = self.monitor.lock();
        if slot.is_some() {
            return false;
        }

        let monitor = Monitor::builder()
            .environment(&self.environment)
            .listener(Arc::new(MetricsListener::new(
                self.metrics.discovery_metrics().clone(),
            )))
            .listener(Arc::clone(&self.rehasher) as Arc<dyn Listener>)
            .start();
        *slot = Some(monitor);

        info!(
            service = %self.config.service_name,
            services = ?self.environment.services(),
            "gateway started"
        );
        true
    }

    /// Stops service discovery and disconnects every remaining device.
    ///
    /// Stopping the monitor delivers a stopped event per service, which makes
    /// the rehasher disconnect its devices first. Returns the number of
    /// devices closed afterwards.
    pub async fn stop(&self) -> usize {
        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.stop();
            monitor.stopped().await;
        }

        let remaining = self
            .registry
            .disconnect_all(&CloseReason::shutdown(GATEWAY_SHUTDOWN));
        info!(service = %self.config.service_name, remaining, "gateway stopped");
        remaining
    }

    /// Starts the gateway, logs status periodically until `shutdown`
    /// completes, then stops.
    pub async fn run_until<F>(&self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        self.start();
        tokio::pin!(shutdown);

        if self.config.status_interval_secs == 0 {
            shutdown.await;
        } else {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(self.config.status_interval_secs));
            loop {
                tokio::select! {
                    () = &mut shutdown => break,
                    _ = ticker.tick() => self.log_status(),
                }
            }
        }

        self.stop().await
    }

    /// Accepts a connection for `id` writing through `sink`.
    ///
    /// The device is registered (replacing any live session with the same
    /// identity) and its dispatch loop runs on a spawned task. When the loop
    /// ends the device is removed from the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry refuses the device.
    pub fn attach<S>(&self, id: Id, mut sink: S) -> ServerResult<Connection>
    where
        S: TransportSink + 'static,
    {
        let device = Arc::new(Device::new(
            DeviceOptions::new(id).with_queue_size(self.config.device.queue_size),
        ));
        self.registry.add(Arc::clone(&device))?;

        let registry = Arc::clone(&self.registry);
        let task_device = Arc::clone(&device);
        let task = tokio::spawn(async move {
            let result = task_device.dispatch(&mut sink).await;
            if let Err(e) = &result {
                debug!(device_id = %task_device.id(), error = %e, "dispatch loop ended with error");
            }
            registry.remove(task_device.id(), task_device.session_id());
            result
        });

        Ok(Connection { device, task })
    }

    fn log_status(&self) {
        let status = self.status();
        info!(
            service = %status.service,
            devices = status.devices,
            health = ?status.health,
            "gateway status"
        );
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("service", &self.config.service_name)
            .field("devices", &self.registry.len())
            .field("started", &self.monitor.lock().is_some())
            .finish_non_exhaustive()
    }
}

/// A device attached to the gateway and its dispatch task.
pub struct Connection {
    device: Arc<Device>,
    task: JoinHandle<Result<(), DeviceError>>,
}

impl Connection {
    /// The connected device.
    #[must_use]
    pub const fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Closes the device because the underlying connection went away.
    pub fn close(&self) -> bool {
        self.device.request_close(CloseReason::shutdown(CONNECTION_CLOSED))
    }

    /// Waits for the dispatch loop to finish.
    ///
    /// # Errors
    ///
    /// Returns the transport error that ended the loop, if any.
    pub async fn join(self) -> Result<(), DeviceError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(device_id = %self.device.id(), error = %e, "dispatch task failed");
                Err(DeviceError::Transport(e.to_string()))
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}
