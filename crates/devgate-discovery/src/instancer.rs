//! Sources of instance lists.
//!
//! An [`Instancer`] publishes the latest [`InstancerState`] for one service
//! through a `tokio::sync::watch` channel. Backends push new states; the
//! [`Monitor`](crate::Monitor) turns each change into an [`Event`](crate::Event).

use std::fmt;

use tokio::sync::watch;

use crate::types::InstancerState;

/// A source of instance lists for one service.
pub trait Instancer: Send + Sync {
    /// Subscribes to state changes. The current state is immediately visible.
    fn subscribe(&self) -> watch::Receiver<InstancerState>;
}

/// An instancer whose instance list never changes.
#[derive(Debug)]
pub struct FixedInstancer {
    sender: watch::Sender<InstancerState>,
}

impl FixedInstancer {
    /// Creates an instancer that always reports `instances`.
    #[must_use]
    pub fn new<I, S>(instances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (sender, _) = watch::channel(InstancerState::instances(instances));
        Self { sender }
    }

    /// Returns the fixed instances.
    #[must_use]
    pub fn instances(&self) -> Vec<String> {
        self.sender.borrow().instances.clone()
    }
}

impl Instancer for FixedInstancer {
    fn subscribe(&self) -> watch::Receiver<InstancerState> {
        self.sender.subscribe()
    }
}

/// An instancer updated by pushing new states, used by backends and tests.
pub struct DynamicInstancer {
    sender: watch::Sender<InstancerState>,
}

impl DynamicInstancer {
    /// Creates an instancer with an initial instance list.
    #[must_use]
    pub fn new<I, S>(instances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (sender, _) = watch::channel(InstancerState::instances(instances));
        Self { sender }
    }

    /// Publishes a new instance list.
    pub fn update<I, S>(&self, instances: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sender.send_replace(InstancerState::instances(instances));
    }

    /// Publishes a backend error.
    pub fn fail(&self, error: impl Into<String>) {
        self.sender.send_replace(InstancerState::error(error));
    }

    /// Returns the current state.
    #[must_use]
    pub fn current(&self) -> InstancerState {
        self.sender.borrow().clone()
    }
}

impl Instancer for DynamicInstancer {
    fn subscribe(&self) -> watch::Receiver<InstancerState> {
        self.sender.subscribe()
    }
}

impl fmt::Debug for DynamicInstancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicInstancer")
            .field("current", &*self.sender.borrow())
            .finish()
    }
}
