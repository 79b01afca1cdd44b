//! Error types for devices and the device registry.

use thiserror::Error;

use crate::id::Id;

/// Errors returned to callers of [`Device::send`](crate::Device::send).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The device has been closed; the caller must wait for a reconnect.
    #[error("device closed")]
    Closed,

    /// The request's cancellation token fired before delivery.
    #[error("request cancelled")]
    Cancelled,

    /// The request's deadline passed before delivery.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The transport failed to write the request.
    #[error("transport error: {0}")]
    Transport(String),
}

impl DeviceError {
    /// Returns true for errors caused by the caller giving up on the request.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Returns true if the device was closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A device that is already closed cannot be registered.
    #[error("device {0} is closed")]
    DeviceClosed(Id),

    /// The registry already holds the maximum number of devices.
    #[error("device limit of {limit} reached")]
    LimitReached {
        /// The configured limit.
        limit: usize,
    },
}

/// Errors produced while parsing a device name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The name does not have a known `<prefix>:<id>` form.
    #[error("invalid device name: {0}")]
    InvalidName(String),

    /// A MAC address contains a character that is neither hex nor a delimiter.
    #[error("invalid character in mac address: {0:?}")]
    InvalidMacCharacter(char),

    /// A MAC address does not have exactly 12 hex digits.
    #[error("invalid mac address length: {0}")]
    InvalidMacLength(usize),
}
