//! Listeners for service discovery events.

use std::fmt;
use std::sync::Arc;

use crate::types::Event;

/// Receives membership events from a [`Monitor`](crate::Monitor).
///
/// Implementations must not block for long; the monitor dispatches events
/// for one instancer sequentially.
pub trait Listener: Send + Sync {
    /// Handles one event.
    fn monitor_event(&self, event: &Event);
}

/// Adapts a plain function to a [`Listener`].
pub struct ListenerFunc<F>(F);

impl<F> ListenerFunc<F>
where
    F: Fn(&Event) + Send + Sync,
{
    /// Wraps `f` as a listener.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Listener for ListenerFunc<F>
where
    F: Fn(&Event) + Send + Sync,
{
    fn monitor_event(&self, event: &Event) {
        (self.0)(event);
    }
}

impl<F> fmt::Debug for ListenerFunc<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerFunc").finish_non_exhaustive()
    }
}

/// An ordered collection of listeners that all receive every event.
#[derive(Clone, Default)]
pub struct Listeners(Vec<Arc<dyn Listener>>);

impl Listeners {
    /// Creates an empty listener set.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds a listener.
    #[must_use]
    pub fn with(mut self, listener: Arc<dyn Listener>) -> Self {
        self.0.push(listener);
        self
    }

    /// Adds a listener in place.
    pub fn push(&mut self, listener: Arc<dyn Listener>) {
        self.0.push(listener);
    }

    /// Returns the number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no listeners.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Listener for Listeners {
    fn monitor_event(&self, event: &Event) {
        for listener in &self.0 {
            listener.monitor_event(event);
        }
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.0.len())
            .finish()
    }
}
