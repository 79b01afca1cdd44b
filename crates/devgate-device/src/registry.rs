//! Registry of connected devices.
//!
//! Holds at most one live [`Device`] per [`Id`]. Registering a device whose
//! identity is already present closes and evicts the old session inside the
//! same write lock, so two live sessions for one identity are never visible
//! together. Listeners and metrics are updated after the lock is released.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use devgate_metrics::DeviceMetrics;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::RegistryError;
use crate::event::{DeviceListener, Event};
use crate::id::{Id, SessionId};
use crate::request::CloseReason;

/// The set of connected devices, keyed by identity.
pub struct Registry {
    devices: RwLock<HashMap<Id, Arc<Device>>>,
    max_devices: Option<usize>,
    metrics: DeviceMetrics,
    listeners: Vec<Arc<dyn DeviceListener>>,
}

impl Registry {
    /// Creates an empty registry with no device limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            max_devices: None,
            metrics: DeviceMetrics::default(),
            listeners: Vec::new(),
        }
    }

    /// Caps the number of distinct identities.
    #[must_use]
    pub const fn with_max_devices(mut self, max_devices: Option<usize>) -> Self {
        self.max_devices = max_devices;
        self
    }

    /// Records registry activity in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: DeviceMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Adds a listener for connect and disconnect events.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn DeviceListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Registers `device`, replacing any live session with the same identity.
    ///
    /// The replaced session is closed with a `replaced` reason and returned.
    /// The new session's duplication count continues from the old one's.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DeviceClosed`] if `device` is already closed,
    /// or [`RegistryError::LimitReached`] if a new identity would exceed the
    /// configured limit.
    pub fn add(&self, device: Arc<Device>) -> Result<Option<Arc<Device>>, RegistryError> {
        let (previous, count) = {
            let mut devices = self.devices.write();
            if device.is_closed() {
                return Err(RegistryError::DeviceClosed(device.id().clone()));
            }

            let previous = devices.get(device.id()).cloned();
            if previous.is_none() {
                if let Some(limit) = self.max_devices {
                    if devices.len() >= limit {
                        drop(devices);
                        self.metrics.inc_limit_reached();
                        warn!(device_id = %device.id(), limit, "device limit reached");
                        return Err(RegistryError::LimitReached { limit });
                    }
                }
            }

            if let Some(previous) = &previous {
                device
                    .statistics()
                    .add_duplications(previous.statistics().duplications() + 1);
                previous.request_close(CloseReason::replaced());
            }

            devices.insert(device.id().clone(), Arc::clone(&device));
            (previous, devices.len())
        };

        self.metrics.set_device_count(count);
        self.metrics.inc_connect();

        if let Some(previous) = &previous {
            info!(
                device_id = %device.id(),
                old_session_id = %previous.session_id(),
                session_id = %device.session_id(),
                "device session replaced"
            );
            self.metrics.inc_duplicate();
            self.metrics.inc_disconnect();
            self.dispatch(&Event::Disconnect {
                device: Arc::clone(previous),
                reason: previous.close_reason(),
            });
        } else {
            debug!(device_id = %device.id(), session_id = %device.session_id(), "device connected");
        }

        self.dispatch(&Event::Connect { device });
        Ok(previous)
    }

    /// Removes the entry for `id` if it still belongs to `session_id`.
    ///
    /// The device is not closed; see [`disconnect_device`](Self::disconnect_device).
    pub fn remove(&self, id: &Id, session_id: SessionId) -> Option<Arc<Device>> {
        let (removed, count) = {
            let mut devices = self.devices.write();
            let removed = match devices.get(id) {
                Some(device) if device.session_id() == session_id => devices.remove(id),
                _ => None,
            };
            (removed, devices.len())
        };

        if let Some(device) = &removed {
            self.metrics.set_device_count(count);
            self.metrics.inc_disconnect();
            debug!(device_id = %id, session_id = %session_id, "device removed");
            self.dispatch(&Event::Disconnect {
                device: Arc::clone(device),
                reason: device.close_reason(),
            });
        }
        removed
    }

    /// Returns the live device for `id`.
    #[must_use]
    pub fn get(&self, id: &Id) -> Option<Arc<Device>> {
        self.devices.read().get(id).cloned()
    }

    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Returns true if no devices are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Returns the devices registered at this instant.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Device>> {
        self.devices.read().values().cloned().collect()
    }

    /// Visits a point-in-time snapshot of the registered devices.
    ///
    /// No lock is held while `visitor` runs, so it may add, remove or close
    /// devices. Devices registered during the visit may not be seen. Returns
    /// the number of devices visited.
    pub fn visit_all<F>(&self, mut visitor: F) -> usize
    where
        F: FnMut(&Arc<Device>),
    {
        let devices = self.snapshot();
        for device in &devices {
            visitor(device);
        }
        devices.len()
    }

    /// Closes and removes the live device for `id`.
    pub fn disconnect(&self, id: &Id, reason: CloseReason) -> bool {
        self.get(id)
            .is_some_and(|device| self.disconnect_device(&device, reason))
    }

    /// Closes `device` and removes it if it is still the registered session.
    ///
    /// Returns true if the device was removed.
    pub fn disconnect_device(&self, device: &Device, reason: CloseReason) -> bool {
        device.request_close(reason);
        self.remove(device.id(), device.session_id()).is_some()
    }

    /// Closes and removes every registered device. Returns how many were removed.
    pub fn disconnect_all(&self, reason: &CloseReason) -> usize {
        let mut count = 0;
        self.visit_all(|device| {
            if self.disconnect_device(device, reason.clone()) {
                count += 1;
            }
        });
        count
    }

    fn dispatch(&self, event: &Event) {
        for listener in &self.listeners {
            listener.on_device_event(event);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("devices", &self.len())
            .field("max_devices", &self.max_devices)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}
