//! Prometheus metrics for the device gateway.
//!
//! Three groups of metrics are registered:
//! - Rehash metrics (keep/disconnect gauges, disconnect-all counter, pass timing)
//! - Service discovery metrics (update/error counters, instance counts)
//! - Device metrics (connected devices, connects, disconnects, duplicates)
//!
//! # Example
//!
//! ```rust
//! use devgate_metrics::prometheus::PrometheusRegistry;
//!
//! let registry = PrometheusRegistry::new();
//!
//! let rehash = registry.rehash_metrics();
//! rehash.set_keep("talaria", 10);
//! rehash.inc_disconnect_all("talaria", "sd_stopped");
//!
//! let output = registry.encode();
//! assert!(output.contains("rehash_keep_device"));
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Rehash metric: devices kept by the last pass.
pub const REHASH_KEEP_DEVICE: &str = "rehash_keep_device";
/// Rehash metric: devices disconnected by the last pass.
pub const REHASH_DISCONNECT_DEVICE: &str = "rehash_disconnect_device";
/// Rehash metric: number of disconnect-all events.
pub const REHASH_DISCONNECT_ALL_COUNTER: &str = "rehash_disconnect_all_count";
/// Rehash metric: unix time the last pass started.
pub const REHASH_TIMESTAMP: &str = "rehash_timestamp";
/// Rehash metric: duration of the last pass in milliseconds.
pub const REHASH_DURATION_MILLISECONDS: &str = "rehash_duration_ms";

/// Disconnect-all reason label for a service discovery backend error.
pub const DISCONNECT_ALL_SD_ERROR: &str = "sd_error";
/// Disconnect-all reason label for a stopped service discovery feed.
pub const DISCONNECT_ALL_SD_STOPPED: &str = "sd_stopped";
/// Disconnect-all reason label for an empty instance list.
pub const DISCONNECT_ALL_SD_NO_INSTANCES: &str = "sd_no_instances";

/// Label set carrying only the service name.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceLabels {
    /// The service name.
    pub service: String,
}

impl ServiceLabels {
    fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }
}

/// Label set for disconnect-all events.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DisconnectAllLabels {
    /// The service name.
    pub service: String,
    /// Why every device was disconnected.
    pub reason: String,
}

#[allow(clippy::cast_possible_wrap)] // Counts won't exceed i64::MAX
fn as_gauge_value(value: u64) -> i64 {
    value as i64
}

#[allow(clippy::cast_sign_loss)] // Value is always non-negative
fn from_gauge_value(value: i64) -> u64 {
    value.max(0) as u64
}

/// Metrics recorded by the rehasher, all labeled by service name.
#[derive(Clone)]
pub struct RehashMetrics {
    keep: Family<ServiceLabels, Gauge>,
    disconnect: Family<ServiceLabels, Gauge>,
    disconnect_all: Family<DisconnectAllLabels, Counter>,
    timestamp: Family<ServiceLabels, Gauge>,
    duration_ms: Family<ServiceLabels, Gauge>,
}

impl std::fmt::Debug for RehashMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RehashMetrics").finish_non_exhaustive()
    }
}

impl Default for RehashMetrics {
    /// Creates metrics that are not attached to any registry.
    fn default() -> Self {
        Self::new(&mut Registry::default())
    }
}

impl RehashMetrics {
    /// Creates rehash metrics and registers them with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let keep = Family::<ServiceLabels, Gauge>::default();
        registry.register(
            REHASH_KEEP_DEVICE,
            "Number of devices kept by the last rehash pass",
            keep.clone(),
        );

        let disconnect = Family::<ServiceLabels, Gauge>::default();
        registry.register(
            REHASH_DISCONNECT_DEVICE,
            "Number of devices disconnected by the last rehash pass",
            disconnect.clone(),
        );

        let disconnect_all = Family::<DisconnectAllLabels, Counter>::default();
        registry.register(
            REHASH_DISCONNECT_ALL_COUNTER,
            "Number of times all devices were disconnected because of service discovery",
            disconnect_all.clone(),
        );

        let timestamp = Family::<ServiceLabels, Gauge>::default();
        registry.register(
            REHASH_TIMESTAMP,
            "Unix time at which the last rehash pass started",
            timestamp.clone(),
        );

        let duration_ms = Family::<ServiceLabels, Gauge>::default();
        registry.register(
            REHASH_DURATION_MILLISECONDS,
            "Duration of the last rehash pass in milliseconds",
            duration_ms.clone(),
        );

        Self {
            keep,
            disconnect,
            disconnect_all,
            timestamp,
            duration_ms,
        }
    }

    /// Sets the number of devices kept by the last pass.
    pub fn set_keep(&self, service: &str, count: u64) {
        self.keep
            .get_or_create(&ServiceLabels::new(service))
            .set(as_gauge_value(count));
    }

    /// Gets the number of devices kept by the last pass.
    #[must_use]
    pub fn get_keep(&self, service: &str) -> u64 {
        from_gauge_value(self.keep.get_or_create(&ServiceLabels::new(service)).get())
    }

    /// Sets the number of devices disconnected by the last pass.
    pub fn set_disconnect(&self, service: &str, count: u64) {
        self.disconnect
            .get_or_create(&ServiceLabels::new(service))
            .set(as_gauge_value(count));
    }

    /// Gets the number of devices disconnected by the last pass.
    #[must_use]
    pub fn get_disconnect(&self, service: &str) -> u64 {
        from_gauge_value(
            self.disconnect
                .get_or_create(&ServiceLabels::new(service))
                .get(),
        )
    }

    /// Records one disconnect-all event.
    pub fn inc_disconnect_all(&self, service: &str, reason: &str) {
        let labels = DisconnectAllLabels {
            service: service.to_string(),
            reason: reason.to_string(),
        };
        self.disconnect_all.get_or_create(&labels).inc();
    }

    /// Gets the number of disconnect-all events for a service and reason.
    #[must_use]
    pub fn get_disconnect_all(&self, service: &str, reason: &str) -> u64 {
        let labels = DisconnectAllLabels {
            service: service.to_string(),
            reason: reason.to_string(),
        };
        self.disconnect_all.get_or_create(&labels).get()
    }

    /// Records when a pass started.
    pub fn set_timestamp(&self, service: &str, started_at: DateTime<Utc>) {
        self.timestamp
            .get_or_create(&ServiceLabels::new(service))
            .set(started_at.timestamp());
    }

    /// Gets the unix time of the last pass.
    #[must_use]
    pub fn get_timestamp(&self, service: &str) -> i64 {
        self.timestamp
            .get_or_create(&ServiceLabels::new(service))
            .get()
    }

    /// Records how long a pass took.
    #[allow(clippy::cast_possible_truncation)] // Pass durations fit in i64 milliseconds
    pub fn set_duration(&self, service: &str, duration: Duration) {
        self.duration_ms
            .get_or_create(&ServiceLabels::new(service))
            .set(duration.as_millis() as i64);
    }

    /// Gets the duration of the last pass in milliseconds.
    #[must_use]
    pub fn get_duration_ms(&self, service: &str) -> i64 {
        self.duration_ms
            .get_or_create(&ServiceLabels::new(service))
            .get()
    }
}

/// Metrics describing the service discovery feed.
#[derive(Clone)]
pub struct DiscoveryMetrics {
    error_count: Family<ServiceLabels, Counter>,
    update_count: Family<ServiceLabels, Counter>,
    instance_count: Family<ServiceLabels, Gauge>,
    last_error_timestamp: Family<ServiceLabels, Gauge>,
    last_update_timestamp: Family<ServiceLabels, Gauge>,
}

impl std::fmt::Debug for DiscoveryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryMetrics").finish_non_exhaustive()
    }
}

impl Default for DiscoveryMetrics {
    fn default() -> Self {
        Self::new(&mut Registry::default())
    }
}

impl DiscoveryMetrics {
    /// Creates discovery metrics and registers them with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let error_count = Family::<ServiceLabels, Counter>::default();
        registry.register(
            "sd_error_count",
            "The total count of errors from the service discovery backend for a particular service",
            error_count.clone(),
        );

        let update_count = Family::<ServiceLabels, Counter>::default();
        registry.register(
            "sd_update_count",
            "The total count of updates from the service discovery backend for a particular service",
            update_count.clone(),
        );

        let instance_count = Family::<ServiceLabels, Gauge>::default();
        registry.register(
            "sd_instance_count",
            "The current number of service instances of a given type",
            instance_count.clone(),
        );

        let last_error_timestamp = Family::<ServiceLabels, Gauge>::default();
        registry.register(
            "sd_last_error_timestamp",
            "The last time the service discovery backend sent an error for a given service",
            last_error_timestamp.clone(),
        );

        let last_update_timestamp = Family::<ServiceLabels, Gauge>::default();
        registry.register(
            "sd_last_update_timestamp",
            "The last time the service discovery backend sent updated instances for a given service",
            last_update_timestamp.clone(),
        );

        Self {
            error_count,
            update_count,
            instance_count,
            last_error_timestamp,
            last_update_timestamp,
        }
    }

    /// Records a backend error.
    pub fn record_error(&self, service: &str, at: DateTime<Utc>) {
        let labels = ServiceLabels::new(service);
        self.error_count.get_or_create(&labels).inc();
        self.last_error_timestamp
            .get_or_create(&labels)
            .set(at.timestamp());
    }

    /// Records an instance list update.
    pub fn record_update(&self, service: &str, instances: usize, at: DateTime<Utc>) {
        let labels = ServiceLabels::new(service);
        self.update_count.get_or_create(&labels).inc();
        self.instance_count
            .get_or_create(&labels)
            .set(as_gauge_value(instances as u64));
        self.last_update_timestamp
            .get_or_create(&labels)
            .set(at.timestamp());
    }

    /// Gets the total number of backend errors.
    #[must_use]
    pub fn get_error_count(&self, service: &str) -> u64 {
        self.error_count
            .get_or_create(&ServiceLabels::new(service))
            .get()
    }

    /// Gets the total number of updates.
    #[must_use]
    pub fn get_update_count(&self, service: &str) -> u64 {
        self.update_count
            .get_or_create(&ServiceLabels::new(service))
            .get()
    }

    /// Gets the last known instance count.
    #[must_use]
    pub fn get_instance_count(&self, service: &str) -> u64 {
        from_gauge_value(
            self.instance_count
                .get_or_create(&ServiceLabels::new(service))
                .get(),
        )
    }

    /// Gets the unix time of the last backend error.
    #[must_use]
    pub fn get_last_error_timestamp(&self, service: &str) -> i64 {
        self.last_error_timestamp
            .get_or_create(&ServiceLabels::new(service))
            .get()
    }

    /// Gets the unix time of the last update.
    #[must_use]
    pub fn get_last_update_timestamp(&self, service: &str) -> i64 {
        self.last_update_timestamp
            .get_or_create(&ServiceLabels::new(service))
            .get()
    }
}

/// Metrics describing the set of connected devices.
#[derive(Clone)]
pub struct DeviceMetrics {
    device_count: Gauge,
    connect_count: Counter,
    disconnect_count: Counter,
    duplicate_count: Counter,
    limit_reached_count: Counter,
}

impl std::fmt::Debug for DeviceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMetrics")
            .field("device_count", &self.device_count.get())
            .finish_non_exhaustive()
    }
}

impl Default for DeviceMetrics {
    fn default() -> Self {
        Self::new(&mut Registry::default())
    }
}

impl DeviceMetrics {
    /// Creates device metrics and registers them with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let device_count = Gauge::default();
        registry.register(
            "device_count",
            "The number of devices currently connected",
            device_count.clone(),
        );

        let connect_count = Counter::default();
        registry.register(
            "connect_count",
            "The total number of device connections",
            connect_count.clone(),
        );

        let disconnect_count = Counter::default();
        registry.register(
            "disconnect_count",
            "The total number of device disconnections",
            disconnect_count.clone(),
        );

        let duplicate_count = Counter::default();
        registry.register(
            "duplicate_count",
            "The total number of sessions replaced by a new connection for the same device",
            duplicate_count.clone(),
        );

        let limit_reached_count = Counter::default();
        registry.register(
            "device_limit_reached_count",
            "The total number of connections refused because the device limit was reached",
            limit_reached_count.clone(),
        );

        Self {
            device_count,
            connect_count,
            disconnect_count,
            duplicate_count,
            limit_reached_count,
        }
    }

    /// Sets the number of connected devices.
    pub fn set_device_count(&self, count: usize) {
        self.device_count.set(as_gauge_value(count as u64));
    }

    /// Gets the number of connected devices.
    #[must_use]
    pub fn get_device_count(&self) -> u64 {
        from_gauge_value(self.device_count.get())
    }

    /// Records a connection.
    pub fn inc_connect(&self) {
        self.connect_count.inc();
    }

    /// Gets the total number of connections.
    #[must_use]
    pub fn get_connect(&self) -> u64 {
        self.connect_count.get()
    }

    /// Records a disconnection.
    pub fn inc_disconnect(&self) {
        self.disconnect_count.inc();
    }

    /// Gets the total number of disconnections.
    #[must_use]
    pub fn get_disconnect(&self) -> u64 {
        self.disconnect_count.get()
    }

    /// Records a session replaced by a newer one.
    pub fn inc_duplicate(&self) {
        self.duplicate_count.inc();
    }

    /// Gets the total number of replaced sessions.
    #[must_use]
    pub fn get_duplicate(&self) -> u64 {
        self.duplicate_count.get()
    }

    /// Records a refused connection.
    pub fn inc_limit_reached(&self) {
        self.limit_reached_count.inc();
    }

    /// Gets the total number of refused connections.
    #[must_use]
    pub fn get_limit_reached(&self) -> u64 {
        self.limit_reached_count.get()
    }
}

/// Central Prometheus metrics registry for the gateway.
///
/// Cloning is cheap; clones share the same underlying metrics.
#[derive(Clone)]
pub struct PrometheusRegistry {
    registry: Arc<RwLock<Registry>>,
    rehash_metrics: RehashMetrics,
    discovery_metrics: DiscoveryMetrics,
    device_metrics: DeviceMetrics,
}

impl std::fmt::Debug for PrometheusRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusRegistry")
            .field("device_metrics", &self.device_metrics)
            .finish_non_exhaustive()
    }
}

impl Default for PrometheusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusRegistry {
    /// Creates a registry with every gateway metric registered.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let rehash_metrics = RehashMetrics::new(&mut registry);
        let discovery_metrics = DiscoveryMetrics::new(&mut registry);
        let device_metrics = DeviceMetrics::new(&mut registry);

        Self {
            registry: Arc::new(RwLock::new(registry)),
            rehash_metrics,
            discovery_metrics,
            device_metrics,
        }
    }

    /// Returns the rehash metrics.
    #[must_use]
    pub fn rehash_metrics(&self) -> &RehashMetrics {
        &self.rehash_metrics
    }

    /// Returns the service discovery metrics.
    #[must_use]
    pub fn discovery_metrics(&self) -> &DiscoveryMetrics {
        &self.discovery_metrics
    }

    /// Returns the device metrics.
    #[must_use]
    pub fn device_metrics(&self) -> &DeviceMetrics {
        &self.device_metrics
    }

    /// Encodes all metrics in Prometheus text format.
    #[must_use]
    pub fn encode(&self) -> String {
        let registry = self.registry.read();
        let mut buffer = String::new();
        if encode(&mut buffer, &registry).is_err() {
            tracing::error!("failed to encode prometheus metrics");
            return String::new();
        }
        buffer
    }

    /// Returns the Content-Type header value for Prometheus metrics.
    #[must_use]
    pub const fn content_type() -> &'static str {
        "text/plain; version=0.0.4; charset=utf-8"
    }
}
