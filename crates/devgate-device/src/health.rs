//! Health statistics derived from registry events.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::event::{DeviceListener, Event};

/// Number of currently connected devices.
pub const DEVICE_COUNT: &str = "DeviceCount";
/// Connections accepted since start.
pub const TOTAL_CONNECTION_EVENTS: &str = "TotalConnectionEvents";
/// Disconnections since start.
pub const TOTAL_DISCONNECTION_EVENTS: &str = "TotalDisconnectionEvents";

/// Named health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HealthStats(BTreeMap<String, i64>);

impl HealthStats {
    /// Creates stats with the device counters present and zero.
    #[must_use]
    pub fn new() -> Self {
        let mut stats = Self::default();
        for name in [DEVICE_COUNT, TOTAL_CONNECTION_EVENTS, TOTAL_DISCONNECTION_EVENTS] {
            stats.set(name, 0);
        }
        stats
    }

    /// Returns a stat, zero if unset.
    #[must_use]
    pub fn get(&self, name: &str) -> i64 {
        self.0.get(name).copied().unwrap_or_default()
    }

    /// Sets a stat.
    pub fn set(&mut self, name: &str, value: i64) {
        self.0.insert(name.to_string(), value);
    }

    /// Adds `delta` to a stat.
    pub fn add(&mut self, name: &str, delta: i64) {
        *self.0.entry(name.to_string()).or_default() += delta;
    }
}

/// A deferred update to health stats.
pub type HealthFunc = Box<dyn FnOnce(&mut HealthStats) + Send>;

/// Accepts health updates, applying them on its own schedule.
pub trait HealthDispatcher: Send + Sync {
    /// Queues `f` to run against the current stats.
    fn send_event(&self, f: HealthFunc);
}

/// Translates registry events into health updates.
pub struct HealthListener {
    dispatcher: Arc<dyn HealthDispatcher>,
}

impl HealthListener {
    /// Creates a listener that forwards to `dispatcher`.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn HealthDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl DeviceListener for HealthListener {
    fn on_device_event(&self, event: &Event) {
        if event.is_connect() {
            self.dispatcher.send_event(Box::new(|stats: &mut HealthStats| {
                stats.add(DEVICE_COUNT, 1);
                stats.add(TOTAL_CONNECTION_EVENTS, 1);
            }));
        } else {
            self.dispatcher.send_event(Box::new(|stats: &mut HealthStats| {
                stats.add(DEVICE_COUNT, -1);
                stats.add(TOTAL_DISCONNECTION_EVENTS, 1);
            }));
        }
    }
}

impl fmt::Debug for HealthListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthListener").finish_non_exhaustive()
    }
}

/// An in-process [`HealthDispatcher`] that applies updates immediately.
#[derive(Debug)]
pub struct HealthMonitor {
    stats: Mutex<HealthStats>,
}

impl HealthMonitor {
    /// Creates a monitor with zeroed device counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(HealthStats::new()),
        }
    }

    /// Returns a copy of the current stats.
    #[must_use]
    pub fn snapshot(&self) -> HealthStats {
        self.stats.lock().clone()
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthDispatcher for HealthMonitor {
    fn send_event(&self, f: HealthFunc) {
        f(&mut *self.stats.lock());
    }
}
