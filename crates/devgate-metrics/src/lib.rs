//! Prometheus metrics for the devgate device gateway.
//!
//! `devgate-metrics` owns the metric families shared by the other gateway
//! crates. Each group is a cheap-to-clone handle that can be created against
//! the central [`PrometheusRegistry`] or standalone (via `Default`) in tests.
//!
//! # Example
//!
//! ```rust
//! use devgate_metrics::PrometheusRegistry;
//!
//! let registry = PrometheusRegistry::new();
//! registry.device_metrics().inc_connect();
//! registry.discovery_metrics().record_update("talaria", 3, chrono::Utc::now());
//!
//! assert!(registry.encode().contains("sd_instance_count"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod prometheus;

pub use prometheus::{
    DeviceMetrics, DisconnectAllLabels, DiscoveryMetrics, PrometheusRegistry, RehashMetrics,
    ServiceLabels, DISCONNECT_ALL_SD_ERROR, DISCONNECT_ALL_SD_NO_INSTANCES,
    DISCONNECT_ALL_SD_STOPPED,
};
