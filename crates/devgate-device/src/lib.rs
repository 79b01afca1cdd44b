//! # devgate-device
//!
//! Device sessions and the registry of connected devices.
//!
//! - [`Device`] - One connection: bounded outbound queue, statistics, close state
//! - [`Registry`] - At most one live session per device [`Id`]
//! - [`Statistics`] - Per-session traffic counters
//! - [`HealthListener`] - Turns registry events into health stats

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod device;
pub mod error;
pub mod event;
pub mod health;
pub mod id;
pub mod registry;
pub mod request;
pub mod statistics;
pub mod transport;

pub use device::{Device, DeviceOptions, DEFAULT_QUEUE_SIZE};
pub use error::{DeviceError, IdError, RegistryError};
pub use event::{DeviceListener, DeviceListenerFunc, Event};
pub use health::{
    HealthDispatcher, HealthFunc, HealthListener, HealthMonitor, HealthStats, DEVICE_COUNT,
    TOTAL_CONNECTION_EVENTS, TOTAL_DISCONNECTION_EVENTS,
};
pub use id::{Id, SessionId};
pub use registry::Registry;
pub use request::{CloseKind, CloseReason, Request, Response};
pub use statistics::{format_duration, format_timestamp, system_clock, Clock, Statistics, StatisticsSnapshot};
pub use transport::{ChannelSink, TransportError, TransportSink};
