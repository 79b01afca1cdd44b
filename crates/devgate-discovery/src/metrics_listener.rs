//! Keeps service discovery metrics up to date from monitor events.

use chrono::{DateTime, Utc};
use devgate_metrics::DiscoveryMetrics;

use crate::listener::Listener;
use crate::types::Event;

/// A [`Listener`] that records every event in [`DiscoveryMetrics`].
#[derive(Debug, Clone)]
pub struct MetricsListener {
    metrics: DiscoveryMetrics,
    now: fn() -> DateTime<Utc>,
}

impl MetricsListener {
    /// Creates a listener recording into `metrics`.
    #[must_use]
    pub fn new(metrics: DiscoveryMetrics) -> Self {
        Self {
            metrics,
            now: Utc::now,
        }
    }

    /// Stamps events with `now` instead of the system time.
    #[must_use]
    pub fn with_clock(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Returns the underlying metrics.
    #[must_use]
    pub const fn metrics(&self) -> &DiscoveryMetrics {
        &self.metrics
    }
}

impl Listener for MetricsListener {
    fn monitor_event(&self, event: &Event) {
        let now = (self.now)();
        if event.error.is_some() {
            self.metrics.record_error(&event.service, now);
        } else if !event.stopped {
            self.metrics
                .record_update(&event.service, event.instances.len(), now);
        }
    }
}
