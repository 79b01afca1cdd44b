//! Registry events and their listeners.

use std::fmt;
use std::sync::Arc;

use crate::device::Device;
use crate::request::CloseReason;

/// Something that happened to a device in the registry.
#[derive(Debug, Clone)]
pub enum Event {
    /// A device was registered.
    Connect {
        /// The registered device.
        device: Arc<Device>,
    },
    /// A device left the registry.
    Disconnect {
        /// The removed device.
        device: Arc<Device>,
        /// Why it was closed, if it has been.
        reason: Option<CloseReason>,
    },
}

impl Event {
    /// The device the event is about.
    #[must_use]
    pub const fn device(&self) -> &Arc<Device> {
        match self {
            Self::Connect { device } | Self::Disconnect { device, .. } => device,
        }
    }

    /// Returns true for connect events.
    #[must_use]
    pub const fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { device } => write!(f, "connect {device}"),
            Self::Disconnect { device, reason: Some(reason) } => {
                write!(f, "disconnect {device} ({reason})")
            }
            Self::Disconnect { device, reason: None } => write!(f, "disconnect {device}"),
        }
    }
}

/// Receives registry events. Called after the registry lock is released.
pub trait DeviceListener: Send + Sync {
    /// Handles one event.
    fn on_device_event(&self, event: &Event);
}

/// Adapts a plain function to a [`DeviceListener`].
pub struct DeviceListenerFunc<F>(F);

impl<F> DeviceListenerFunc<F>
where
    F: Fn(&Event) + Send + Sync,
{
    /// Wraps `f` as a listener.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> DeviceListener for DeviceListenerFunc<F>
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_device_event(&self, event: &Event) {
        (self.0)(event);
    }
}

impl<F> fmt::Debug for DeviceListenerFunc<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceListenerFunc").finish_non_exhaustive()
    }
}
