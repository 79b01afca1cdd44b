//! Outbound requests, their responses, and close reasons.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::DeviceError;
use crate::id::{Id, SessionId};

/// A message to deliver to a device.
///
/// The cancellation token and optional deadline travel with the request
/// through the queue, so a caller can give up while it is still waiting.
#[derive(Debug, Clone)]
pub struct Request {
    payload: Vec<u8>,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl Request {
    /// Creates a request that is never cancelled and has no deadline.
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Ties the request to a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Sets an absolute deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline relative to now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The message bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The message length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// The request's cancellation token.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// The request's deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true if the caller has given up on this request.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.abandonment().is_some()
    }

    /// The error a caller that already gave up should see, if it did.
    ///
    /// Cancellation is reported ahead of an expired deadline.
    #[must_use]
    pub fn abandonment(&self) -> Option<DeviceError> {
        if self.cancellation.is_cancelled() {
            Some(DeviceError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(DeviceError::DeadlineExceeded)
        } else {
            None
        }
    }
}

/// Confirms that a request was written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The device the request was delivered to.
    pub device_id: Id,
    /// The session that delivered it.
    pub session_id: SessionId,
    /// Bytes the transport reported writing.
    pub bytes_sent: usize,
}

/// Why a device was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseKind {
    /// Normal shutdown requested by the gateway or the transport owner.
    Shutdown,
    /// The transport failed.
    Transport,
    /// A newer session for the same device replaced this one.
    Replaced,
    /// The device now belongs to another gateway instance.
    Rehash,
    /// Service discovery became unusable and every device was dropped.
    DisconnectAll,
}

impl fmt::Display for CloseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Shutdown => "shutdown",
            Self::Transport => "transport",
            Self::Replaced => "replaced",
            Self::Rehash => "rehash",
            Self::DisconnectAll => "disconnect_all",
        };
        f.write_str(s)
    }
}

/// The reason recorded by the first close of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseReason {
    /// Broad category.
    pub kind: CloseKind,
    /// Short machine-friendly text such as `rehash-other-instance`.
    pub text: String,
    /// The underlying error, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CloseReason {
    /// Creates a reason of the given kind.
    #[must_use]
    pub fn new(kind: CloseKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            error: None,
        }
    }

    /// Attaches the underlying error.
    #[must_use]
    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// A normal shutdown.
    #[must_use]
    pub fn shutdown(text: impl Into<String>) -> Self {
        Self::new(CloseKind::Shutdown, text)
    }

    /// A transport failure.
    #[must_use]
    pub fn transport(error: impl fmt::Display) -> Self {
        Self::new(CloseKind::Transport, "transport-error").with_error(error)
    }

    /// Replacement by a newer session.
    #[must_use]
    pub fn replaced() -> Self {
        Self::new(CloseKind::Replaced, "duplicate")
    }

    /// Ownership moved to another instance.
    #[must_use]
    pub fn rehash(text: impl Into<String>) -> Self {
        Self::new(CloseKind::Rehash, text)
    }

    /// Mass eviction after a service discovery failure.
    #[must_use]
    pub fn disconnect_all(text: impl Into<String>) -> Self {
        Self::new(CloseKind::DisconnectAll, text)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{}: {error}", self.text),
            None => f.write_str(&self.text),
        }
    }
}
