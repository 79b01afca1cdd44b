//! Watches instancers and dispatches membership events to listeners.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::environment::Environment;
use crate::instancer::Instancer;
use crate::listener::{Listener, Listeners};
use crate::types::{normalize_instances, Event, InstancerState, DEFAULT_SCHEME};

/// Builder for a [`Monitor`].
pub struct MonitorBuilder {
    instancers: Vec<(String, Arc<dyn Instancer>)>,
    listeners: Listeners,
    default_scheme: String,
}

impl MonitorBuilder {
    fn new() -> Self {
        Self {
            instancers: Vec::new(),
            listeners: Listeners::new(),
            default_scheme: DEFAULT_SCHEME.to_string(),
        }
    }

    /// Watches an instancer for the given service.
    #[must_use]
    pub fn instancer(mut self, service: impl Into<String>, instancer: Arc<dyn Instancer>) -> Self {
        self.instancers.push((service.into(), instancer));
        self
    }

    /// Watches every instancer of an environment and adopts its default scheme.
    #[must_use]
    pub fn environment(mut self, environment: &Environment) -> Self {
        for (service, instancer) in environment.instancers() {
            self.instancers.push((service.clone(), Arc::clone(instancer)));
        }
        self.default_scheme = environment.default_scheme().to_string();
        self
    }

    /// Adds a listener that receives every event.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Sets the scheme applied to instances without one.
    #[must_use]
    pub fn default_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.default_scheme = scheme.into();
        self
    }

    /// Spawns one watch task per instancer on the current tokio runtime.
    #[must_use]
    pub fn start(self) -> Monitor {
        let shutdown = CancellationToken::new();
        let listeners = Arc::new(self.listeners);
        let default_scheme: Arc<str> = Arc::from(self.default_scheme);

        let tasks = self
            .instancers
            .into_iter()
            .map(|(service, instancer)| {
                info!(service = %service, "watching service discovery");
                tokio::spawn(watch_instancer(
                    service,
                    instancer,
                    Arc::clone(&listeners),
                    Arc::clone(&default_scheme),
                    shutdown.clone(),
                ))
            })
            .collect();

        Monitor {
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }
}

impl fmt::Debug for MonitorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorBuilder")
            .field("instancers", &self.instancers.len())
            .field("listeners", &self.listeners)
            .field("default_scheme", &self.default_scheme)
            .finish()
    }
}

/// A running set of instancer watches.
///
/// Every state change becomes an [`Event`]; stopping the monitor delivers a
/// final `stopped` event per instancer.
pub struct Monitor {
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Monitor {
    /// Creates a monitor builder.
    #[must_use]
    pub fn builder() -> MonitorBuilder {
        MonitorBuilder::new()
    }

    /// Signals every watch task to stop. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Waits for every watch task to finish.
    pub async fn stopped(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "service discovery watch task failed");
            }
        }
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

fn state_event(service: &str, state: &InstancerState, default_scheme: &str, event_count: u64) -> Event {
    Event {
        key: service.to_string(),
        service: service.to_string(),
        instances: if state.error.is_some() {
            Vec::new()
        } else {
            normalize_instances(default_scheme, &state.instances)
        },
        error: state.error.clone(),
        stopped: false,
        event_count,
    }
}

async fn watch_instancer(
    service: String,
    instancer: Arc<dyn Instancer>,
    listeners: Arc<Listeners>,
    default_scheme: Arc<str>,
    shutdown: CancellationToken,
) {
    let mut receiver: watch::Receiver<InstancerState> = instancer.subscribe();
    let mut event_count = 0u64;
    let mut state = receiver.borrow_and_update().clone();

    loop {
        event_count += 1;
        let event = state_event(&service, &state, &default_scheme, event_count);
        debug!(service = %service, event_count, event = %event, "dispatching service discovery event");
        listeners.monitor_event(&event);

        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            changed = receiver.changed() => {
                if changed.is_err() {
                    // No further updates can arrive; hold the last state until stopped.
                    warn!(service = %service, "instancer closed");
                    shutdown.cancelled().await;
                    break;
                }
                state = receiver.borrow_and_update().clone();
            }
        }
    }

    let stopped = Event {
        key: service.clone(),
        service: service.clone(),
        stopped: true,
        event_count: event_count + 1,
        ..Event::default()
    };
    info!(service = %service, "service discovery stopped");
    listeners.monitor_event(&stopped);
}
