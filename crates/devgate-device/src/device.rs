//! One device connection: bounded outbound queue, statistics and close state.
//!
//! Senders reserve a queue slot from a semaphore sized to the queue capacity,
//! push an envelope, and then wait for the dispatch loop to report the
//! transport outcome. Closing flips the closed flag under the queue lock,
//! drains every queued envelope and closes the semaphore, so no sender can
//! slip into the queue after the close and no blocked sender is left waiting.
//! The dispatch loop drops a write still in progress once the device closes.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::DeviceError;
use crate::id::{Id, SessionId};
use crate::request::{CloseReason, Request, Response};
use crate::statistics::{system_clock, Clock, Statistics};
use crate::transport::TransportSink;

/// Queue capacity used when none is configured.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Options for constructing a [`Device`].
#[derive(Clone)]
pub struct DeviceOptions {
    /// The device identity.
    pub id: Id,
    /// Outbound queue capacity; zero means [`DEFAULT_QUEUE_SIZE`].
    pub queue_size: usize,
    /// When the connection was accepted; defaults to the clock's now.
    pub connected_at: Option<DateTime<Utc>>,
    /// Source of the current time; defaults to the system clock.
    pub clock: Option<Clock>,
}

impl DeviceOptions {
    /// Creates options for `id` with default settings.
    #[must_use]
    pub fn new(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            queue_size: DEFAULT_QUEUE_SIZE,
            connected_at: None,
            clock: None,
        }
    }

    /// Sets the queue capacity.
    #[must_use]
    pub const fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Sets the connection time.
    #[must_use]
    pub const fn with_connected_at(mut self, connected_at: DateTime<Utc>) -> Self {
        self.connected_at = Some(connected_at);
        self
    }

    /// Sets the clock used for up time.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }
}

impl fmt::Debug for DeviceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceOptions")
            .field("id", &self.id)
            .field("queue_size", &self.queue_size)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

struct Envelope {
    sequence: u64,
    request: Request,
    complete: oneshot::Sender<Result<usize, DeviceError>>,
    _slot: OwnedSemaphorePermit,
}

/// A live device session.
pub struct Device {
    id: Id,
    session_id: SessionId,
    queue_size: usize,
    statistics: Statistics,
    queue: Mutex<VecDeque<Envelope>>,
    slots: Arc<Semaphore>,
    ready: Notify,
    closed: AtomicBool,
    shutdown: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    sequence: AtomicU64,
}

impl Device {
    /// Creates an open device with a fresh session id.
    #[must_use]
    pub fn new(options: DeviceOptions) -> Self {
        let queue_size = if options.queue_size == 0 {
            DEFAULT_QUEUE_SIZE
        } else {
            options.queue_size
        };
        let clock = options.clock.unwrap_or_else(system_clock);
        let connected_at = options.connected_at.unwrap_or_else(|| clock());

        Self {
            id: options.id,
            session_id: SessionId::new(),
            queue_size,
            statistics: Statistics::new(clock, connected_at),
            queue: Mutex::new(VecDeque::with_capacity(queue_size)),
            slots: Arc::new(Semaphore::new(queue_size)),
            ready: Notify::new(),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            close_reason: Mutex::new(None),
            sequence: AtomicU64::new(0),
        }
    }

    /// The device identity.
    #[must_use]
    pub const fn id(&self) -> &Id {
        &self.id
    }

    /// The identifier of this connection.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The device's traffic counters.
    #[must_use]
    pub const fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// The fixed queue capacity.
    #[must_use]
    pub const fn queue_size(&self) -> usize {
        self.queue_size
    }

    /// Number of requests waiting for the dispatch loop.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true once the device has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The reason recorded by the first close, if closed.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.lock().clone()
    }

    /// Completes once the device is closed.
    pub async fn wait_closed(&self) {
        self.shutdown.cancelled().await;
    }

    /// Queues `request` and waits until the transport has written it.
    ///
    /// Blocks while the queue is full, until a slot frees up, the request is
    /// cancelled or times out, or the device closes. A caller that gave up
    /// before the close sees its own cancellation or deadline; one still
    /// waiting when the close lands sees [`DeviceError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Closed`] if the device is or becomes closed,
    /// [`DeviceError::Cancelled`] or [`DeviceError::DeadlineExceeded`] if the
    /// caller gives up first, and [`DeviceError::Transport`] if the write fails.
    pub async fn send(&self, request: Request) -> Result<Response, DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::Closed);
        }

        let cancellation = request.cancellation().clone();
        let deadline = request.deadline();

        let slot = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                return Err(request.abandonment().unwrap_or(DeviceError::Closed));
            }
            () = cancellation.cancelled() => return Err(DeviceError::Cancelled),
            () = sleep_until(deadline) => return Err(DeviceError::DeadlineExceeded),
            slot = Arc::clone(&self.slots).acquire_owned() => match slot {
                Ok(slot) => slot,
                Err(_) => return Err(request.abandonment().unwrap_or(DeviceError::Closed)),
            },
        };

        let (complete, outcome) = oneshot::channel();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        {
            let mut queue = self.queue.lock();
            if self.is_closed() {
                return Err(DeviceError::Closed);
            }
            queue.push_back(Envelope {
                sequence,
                request,
                complete,
                _slot: slot,
            });
        }
        self.ready.notify_one();

        let mut outcome = outcome;
        let result = tokio::select! {
            biased;
            outcome = &mut outcome => outcome.unwrap_or(Err(DeviceError::Closed)),
            // Once closed, the closer resolves queued envelopes and the
            // dispatch loop resolves the one it holds.
            () = self.shutdown.cancelled() => outcome.await.unwrap_or(Err(DeviceError::Closed)),
            () = cancellation.cancelled() => {
                self.abandon(sequence);
                Err(DeviceError::Cancelled)
            }
            () = sleep_until(deadline) => {
                self.abandon(sequence);
                Err(DeviceError::DeadlineExceeded)
            }
        };

        result.map(|bytes_sent| Response {
            device_id: self.id.clone(),
            session_id: self.session_id,
            bytes_sent,
        })
    }

    /// Removes a still-queued request, freeing its slot.
    fn abandon(&self, sequence: u64) {
        let mut queue = self.queue.lock();
        if let Some(position) = queue.iter().position(|e| e.sequence == sequence) {
            queue.remove(position);
            trace!(device_id = %self.id, sequence, "abandoned queued request");
        }
    }

    /// Closes the device. Only the first call has any effect.
    ///
    /// Stops accepting sends, fails every queued request and records
    /// `reason`. Queued requests fail with [`DeviceError::Closed`] unless
    /// their caller had already given up. Returns true if this call
    /// performed the close.
    pub fn request_close(&self, reason: CloseReason) -> bool {
        let drained: Vec<(Envelope, DeviceError)> = {
            let mut queue = self.queue.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return false;
            }
            *self.close_reason.lock() = Some(reason.clone());
            queue
                .drain(..)
                .map(|envelope| {
                    let error = envelope.request.abandonment().unwrap_or(DeviceError::Closed);
                    (envelope, error)
                })
                .collect()
        };

        self.slots.close();
        debug!(
            device_id = %self.id,
            session_id = %self.session_id,
            reason = %reason,
            dropped = drained.len(),
            "device closed"
        );

        for (envelope, error) in drained {
            let _ = envelope.complete.send(Err(error));
        }
        self.shutdown.cancel();
        true
    }

    /// Drains the queue into `sink` until the device closes.
    ///
    /// Requests are written in queue order. A request whose caller gave up
    /// while it was queued is skipped. Statistics are updated only after a
    /// successful write. A write failure closes the device. Closing the device
    /// abandons a write still in progress.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Transport`] if the sink fails.
    pub async fn dispatch<S: TransportSink>(&self, sink: &mut S) -> Result<(), DeviceError> {
        loop {
            let next = self.queue.lock().pop_front();
            let Some(envelope) = next else {
                tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => return Ok(()),
                    () = self.ready.notified() => continue,
                }
            };

            if let Some(error) = envelope.request.abandonment() {
                let _ = envelope.complete.send(Err(error));
                continue;
            }

            let written = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => None,
                written = sink.write(&envelope.request) => Some(written),
            };
            let Some(written) = written else {
                let error = envelope.request.abandonment().unwrap_or(DeviceError::Closed);
                trace!(device_id = %self.id, sequence = envelope.sequence, "write abandoned on close");
                let _ = envelope.complete.send(Err(error));
                return Ok(());
            };

            match written {
                Ok(bytes) => {
                    self.statistics
                        .add_bytes_sent(u64::try_from(bytes).unwrap_or(u64::MAX));
                    self.statistics.add_messages_sent(1);
                    let _ = envelope.complete.send(Ok(bytes));
                }
                Err(e) => {
                    warn!(device_id = %self.id, session_id = %self.session_id, error = %e, "transport write failed");
                    let error = DeviceError::Transport(e.to_string());
                    let _ = envelope.complete.send(Err(error.clone()));
                    self.request_close(CloseReason::transport(&e));
                    return Err(error);
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("queue_size", &self.queue_size)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Serialize for Device {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Device", 3)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("pending", &self.pending())?;
        state.serialize_field("statistics", &self.statistics)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::CloseKind;
    use crate::transport::{ChannelSink, TransportError};
    use std::time::Duration;

    fn device(queue_size: usize) -> Device {
        Device::new(DeviceOptions::new("mac:112233445566").with_queue_size(queue_size))
    }

    struct FailingSink;

    impl TransportSink for FailingSink {
        async fn write(&mut self, _request: &Request) -> Result<usize, TransportError> {
            Err(TransportError::Write("broken pipe".to_string()))
        }
    }

    /// A sink whose writes never complete, like a peer that stopped reading.
    #[derive(Default)]
    struct StalledSink {
        writing: Arc<AtomicBool>,
    }

    impl TransportSink for StalledSink {
        async fn write(&mut self, _request: &Request) -> Result<usize, TransportError> {
            self.writing.store(true, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    // ==================== Construction Tests ====================

    #[test]
    fn test_new_device_is_open() {
        let device = device(10);
        assert!(!device.is_closed());
        assert!(device.close_reason().is_none());
        assert_eq!(device.pending(), 0);
        assert_eq!(device.queue_size(), 10);
        assert_eq!(device.to_string(), "mac:112233445566");
    }

    #[test]
    fn test_zero_queue_size_uses_default() {
        assert_eq!(device(0).queue_size(), DEFAULT_QUEUE_SIZE);
    }

    // ==================== Close Tests ====================

    #[test]
    fn test_request_close_is_idempotent() {
        let device = device(10);

        assert!(device.request_close(CloseReason::shutdown("first")));
        assert!(device.is_closed());
        assert!(!device.request_close(CloseReason::shutdown("second")));
        assert!(device.is_closed());
        assert_eq!(device.close_reason().unwrap().text, "first");
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let device = device(10);
        device.request_close(CloseReason::shutdown("test"));

        let result = device.send(Request::new("hello")).await;
        assert_eq!(result, Err(DeviceError::Closed));
    }

    #[tokio::test]
    async fn test_wait_closed() {
        let device = Arc::new(device(10));
        let waiter = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.wait_closed().await })
        };

        device.request_close(CloseReason::shutdown("test"));
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    // ==================== Send Tests ====================

    #[tokio::test]
    async fn test_send_delivers_and_counts() {
        let device = Arc::new(device(10));
        let (mut sink, mut receiver) = ChannelSink::new(10);
        let dispatcher = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.dispatch(&mut sink).await })
        };

        let response = device.send(Request::new("hello")).await.unwrap();
        assert_eq!(response.bytes_sent, 5);
        assert_eq!(response.device_id, *device.id());
        assert_eq!(response.session_id, device.session_id());
        assert_eq!(receiver.recv().await.unwrap(), b"hello");

        assert_eq!(device.statistics().messages_sent(), 1);
        assert_eq!(device.statistics().bytes_sent(), 5);

        device.request_close(CloseReason::shutdown("test"));
        assert!(dispatcher.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_send_preserves_order() {
        let device = Arc::new(device(10));
        let (mut sink, mut receiver) = ChannelSink::new(10);
        let dispatcher = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.dispatch(&mut sink).await })
        };

        for i in 0..5u8 {
            device.send(Request::new(vec![i])).await.unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(receiver.recv().await.unwrap(), vec![i]);
        }

        device.request_close(CloseReason::shutdown("test"));
        dispatcher.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_statistics_not_updated_on_enqueue() {
        let device = Arc::new(device(10));
        let sender = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.send(Request::new("hello")).await })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while device.pending() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(device.statistics().messages_sent(), 0);

        device.request_close(CloseReason::shutdown("test"));
        assert_eq!(sender.await.unwrap(), Err(DeviceError::Closed));
        assert_eq!(device.statistics().messages_sent(), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_queued_frees_slot() {
        let device = Arc::new(device(1));
        let token = CancellationToken::new();
        let sender = {
            let device = Arc::clone(&device);
            let token = token.clone();
            tokio::spawn(async move {
                device
                    .send(Request::new("hello").with_cancellation(token))
                    .await
            })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while device.pending() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        token.cancel();
        assert_eq!(sender.await.unwrap(), Err(DeviceError::Cancelled));
        assert_eq!(device.pending(), 0);

        // The reclaimed slot lets another request in.
        let device_clone = Arc::clone(&device);
        let second = tokio::spawn(async move { device_clone.send(Request::new("again")).await });
        tokio::time::timeout(Duration::from_secs(5), async {
            while device.pending() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        device.request_close(CloseReason::shutdown("test"));
        assert_eq!(second.await.unwrap(), Err(DeviceError::Closed));
    }

    #[tokio::test]
    async fn test_full_queue_deadline() {
        let device = Arc::new(device(1));
        let first = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.send(Request::new("first")).await })
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while device.pending() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let result = device
            .send(Request::new("second").with_timeout(Duration::from_millis(20)))
            .await;
        assert_eq!(result, Err(DeviceError::DeadlineExceeded));

        device.request_close(CloseReason::shutdown("test"));
        assert_eq!(first.await.unwrap(), Err(DeviceError::Closed));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_sender() {
        let device = Arc::new(device(1));
        let mut senders = Vec::new();
        for _ in 0..3 {
            let device = Arc::clone(&device);
            senders.push(tokio::spawn(async move { device.send(Request::new("x")).await }));
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while device.pending() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        device.request_close(CloseReason::shutdown("test"));
        for sender in senders {
            let result = tokio::time::timeout(Duration::from_secs(5), sender)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(result, Err(DeviceError::Closed));
        }
    }

    #[tokio::test]
    async fn test_cancel_before_close_keeps_cancellation() {
        let device = Arc::new(device(1));
        let queued_token = CancellationToken::new();
        let blocked_token = CancellationToken::new();
        let queued = {
            let device = Arc::clone(&device);
            let token = queued_token.clone();
            tokio::spawn(async move {
                device
                    .send(Request::new("queued").with_cancellation(token))
                    .await
            })
        };
        wait_until(|| device.pending() == 1).await;
        let blocked = {
            let device = Arc::clone(&device);
            let token = blocked_token.clone();
            tokio::spawn(async move {
                device
                    .send(Request::new("blocked").with_cancellation(token))
                    .await
            })
        };
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        // Neither sender runs between the cancellation and the close.
        queued_token.cancel();
        blocked_token.cancel();
        device.request_close(CloseReason::shutdown("test"));

        assert_eq!(queued.await.unwrap(), Err(DeviceError::Cancelled));
        assert_eq!(blocked.await.unwrap(), Err(DeviceError::Cancelled));
    }

    #[tokio::test]
    async fn test_close_before_cancel_reports_closed() {
        let device = Arc::new(device(1));
        let token = CancellationToken::new();
        let sender = {
            let device = Arc::clone(&device);
            let token = token.clone();
            tokio::spawn(async move {
                device
                    .send(Request::new("queued").with_cancellation(token))
                    .await
            })
        };
        wait_until(|| device.pending() == 1).await;

        device.request_close(CloseReason::shutdown("test"));
        token.cancel();

        assert_eq!(sender.await.unwrap(), Err(DeviceError::Closed));
    }

    #[tokio::test]
    async fn test_expired_deadline_before_close_reports_deadline() {
        let device = Arc::new(device(1));
        let sender = {
            let device = Arc::clone(&device);
            tokio::spawn(async move {
                device
                    .send(Request::new("late").with_timeout(Duration::from_millis(20)))
                    .await
            })
        };
        wait_until(|| device.pending() == 1).await;

        // Block the runtime past the deadline so the sender cannot observe it first.
        std::thread::sleep(Duration::from_millis(40));
        device.request_close(CloseReason::shutdown("test"));

        assert_eq!(sender.await.unwrap(), Err(DeviceError::DeadlineExceeded));
    }

    // ==================== Dispatch Tests ====================

    #[tokio::test]
    async fn test_close_abandons_stalled_write() {
        let device = Arc::new(device(4));
        let sink = StalledSink::default();
        let writing = Arc::clone(&sink.writing);
        let dispatcher = {
            let device = Arc::clone(&device);
            let mut sink = sink;
            tokio::spawn(async move { device.dispatch(&mut sink).await })
        };

        let in_flight = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.send(Request::new("stuck")).await })
        };
        wait_until(|| writing.load(Ordering::SeqCst)).await;

        let queued = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.send(Request::new("behind")).await })
        };
        wait_until(|| device.pending() == 1).await;

        device.request_close(CloseReason::shutdown("test"));

        let timeout = Duration::from_secs(5);
        let result = tokio::time::timeout(timeout, in_flight).await.unwrap().unwrap();
        assert_eq!(result, Err(DeviceError::Closed));
        let result = tokio::time::timeout(timeout, queued).await.unwrap().unwrap();
        assert_eq!(result, Err(DeviceError::Closed));
        tokio::time::timeout(timeout, dispatcher)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(device.statistics().messages_sent(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_stalled_write_reports_cancellation_on_close() {
        let device = Arc::new(device(4));
        let sink = StalledSink::default();
        let writing = Arc::clone(&sink.writing);
        let dispatcher = {
            let device = Arc::clone(&device);
            let mut sink = sink;
            tokio::spawn(async move { device.dispatch(&mut sink).await })
        };

        let token = CancellationToken::new();
        let sender = {
            let device = Arc::clone(&device);
            let token = token.clone();
            tokio::spawn(async move {
                device
                    .send(Request::new("stuck").with_cancellation(token))
                    .await
            })
        };
        wait_until(|| writing.load(Ordering::SeqCst)).await;

        token.cancel();
        device.request_close(CloseReason::shutdown("test"));

        assert_eq!(sender.await.unwrap(), Err(DeviceError::Cancelled));
        dispatcher.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_transport_failure_closes_device() {
        let device = Arc::new(device(10));
        let dispatcher = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.dispatch(&mut FailingSink).await })
        };

        let result = device.send(Request::new("hello")).await;
        assert!(matches!(result, Err(DeviceError::Transport(_))));
        assert!(matches!(dispatcher.await.unwrap(), Err(DeviceError::Transport(_))));

        assert!(device.is_closed());
        assert_eq!(device.close_reason().unwrap().kind, CloseKind::Transport);
        assert_eq!(device.statistics().messages_sent(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_skips_cancelled_requests() {
        let device = Arc::new(device(10));
        let token = CancellationToken::new();
        let cancelled = {
            let device = Arc::clone(&device);
            let token = token.clone();
            tokio::spawn(async move {
                device
                    .send(Request::new("skip").with_cancellation(token))
                    .await
            })
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while device.pending() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        token.cancel();
        assert_eq!(cancelled.await.unwrap(), Err(DeviceError::Cancelled));

        let (mut sink, mut receiver) = ChannelSink::new(10);
        let dispatcher = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.dispatch(&mut sink).await })
        };

        device.send(Request::new("keep")).await.unwrap();
        assert_eq!(receiver.recv().await.unwrap(), b"keep");
        assert_eq!(device.statistics().messages_sent(), 1);

        device.request_close(CloseReason::shutdown("test"));
        dispatcher.await.unwrap().unwrap();
    }

    // ==================== Serialization Tests ====================

    #[test]
    fn test_device_json_shape() {
        let json = serde_json::to_value(device(10)).unwrap();
        assert_eq!(json["id"], "mac:112233445566");
        assert_eq!(json["pending"], 0);
        assert_eq!(json["statistics"]["messagesSent"], 0);
    }
}
