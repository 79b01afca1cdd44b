//! Per-device traffic counters.
//!
//! Counters only ever grow and are updated with atomic adds, so a
//! [`Statistics`] can be shared by the dispatch loop, the transport reader and
//! any number of status readers without locking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Returns a clock backed by the system time.
#[must_use]
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Traffic counters and connection timing for one device session.
pub struct Statistics {
    now: Clock,
    connected_at: DateTime<Utc>,
    duplications: AtomicU64,
    bytes_sent: AtomicU64,
    messages_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_received: AtomicU64,
}

impl Statistics {
    /// Creates zeroed statistics for a session connected at `connected_at`.
    #[must_use]
    pub fn new(now: Clock, connected_at: DateTime<Utc>) -> Self {
        Self {
            now,
            connected_at,
            duplications: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
        }
    }

    /// When the session connected.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Time since the session connected; zero if the clock is behind.
    #[must_use]
    pub fn up_time(&self) -> Duration {
        ((self.now)() - self.connected_at)
            .to_std()
            .unwrap_or_default()
    }

    /// How many earlier sessions this one has replaced.
    #[must_use]
    pub fn duplications(&self) -> u64 {
        self.duplications.load(Ordering::Relaxed)
    }

    /// Adds to the duplication count.
    pub fn add_duplications(&self, delta: u64) {
        self.duplications.fetch_add(delta, Ordering::Relaxed);
    }

    /// Bytes delivered to the transport.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Adds to the bytes sent.
    pub fn add_bytes_sent(&self, delta: u64) {
        self.bytes_sent.fetch_add(delta, Ordering::Relaxed);
    }

    /// Messages delivered to the transport.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Adds to the messages sent.
    pub fn add_messages_sent(&self, delta: u64) {
        self.messages_sent.fetch_add(delta, Ordering::Relaxed);
    }

    /// Bytes read from the device.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Adds to the bytes received.
    pub fn add_bytes_received(&self, delta: u64) {
        self.bytes_received.fetch_add(delta, Ordering::Relaxed);
    }

    /// Messages read from the device.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Adds to the messages received.
    pub fn add_messages_received(&self, delta: u64) {
        self.messages_received.fetch_add(delta, Ordering::Relaxed);
    }

    /// Captures a point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            duplications: self.duplications(),
            bytes_sent: self.bytes_sent(),
            messages_sent: self.messages_sent(),
            bytes_received: self.bytes_received(),
            messages_received: self.messages_received(),
            connected_at: self.connected_at,
            up_time: self.up_time(),
        }
    }
}

impl fmt::Debug for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statistics")
            .field("connected_at", &self.connected_at)
            .field("duplications", &self.duplications())
            .field("bytes_sent", &self.bytes_sent())
            .field("messages_sent", &self.messages_sent())
            .field("bytes_received", &self.bytes_received())
            .field("messages_received", &self.messages_received())
            .finish_non_exhaustive()
    }
}

impl Serialize for Statistics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

/// A copy of [`Statistics`] taken at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    /// Earlier sessions replaced by this one.
    pub duplications: u64,
    /// Bytes delivered to the transport.
    pub bytes_sent: u64,
    /// Messages delivered to the transport.
    pub messages_sent: u64,
    /// Bytes read from the device.
    pub bytes_received: u64,
    /// Messages read from the device.
    pub messages_received: u64,
    /// When the session connected.
    #[serde(serialize_with = "serialize_timestamp")]
    pub connected_at: DateTime<Utc>,
    /// Time since the session connected.
    #[serde(serialize_with = "serialize_duration")]
    pub up_time: Duration,
}

fn serialize_timestamp<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(*at))
}

fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_duration(*duration))
}

/// Formats a timestamp as RFC 3339 in UTC with trailing fractional zeros removed.
///
/// `2024-05-01T10:00:00.120Z`, `2024-05-01T10:00:00Z`.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    let full = at.to_rfc3339_opts(SecondsFormat::Nanos, true);
    match full.rsplit_once('.') {
        Some((seconds, fraction)) => {
            let digits = fraction.trim_end_matches('Z').trim_end_matches('0');
            if digits.is_empty() {
                format!("{seconds}Z")
            } else {
                format!("{seconds}.{digits}Z")
            }
        }
        None => full,
    }
}

/// Formats a duration with hour, minute and second units.
///
/// `15h0m0s`, `1m5s`, `1.5s`, `250ms`, `0s`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    const NANOS_PER_MICRO: u128 = 1_000;
    const NANOS_PER_MILLI: u128 = 1_000_000;
    const NANOS_PER_SECOND: u128 = 1_000_000_000;

    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < NANOS_PER_MICRO {
        return format!("{nanos}ns");
    }
    if nanos < NANOS_PER_MILLI {
        return format!("{}µs", decimal(nanos, NANOS_PER_MICRO));
    }
    if nanos < NANOS_PER_SECOND {
        return format!("{}ms", decimal(nanos, NANOS_PER_MILLI));
    }

    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = u128::from(total_seconds % 60) * NANOS_PER_SECOND
        + u128::from(duration.subsec_nanos());

    let mut formatted = String::new();
    if hours > 0 {
        formatted.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        formatted.push_str(&format!("{minutes}m"));
    }
    formatted.push_str(&format!("{}s", decimal(seconds, NANOS_PER_SECOND)));
    formatted
}

fn decimal(value: u128, unit: u128) -> String {
    let whole = value / unit;
    let fraction = value % unit;
    if fraction == 0 {
        return whole.to_string();
    }
    let width = unit.ilog10() as usize;
    let digits = format!("{fraction:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}
