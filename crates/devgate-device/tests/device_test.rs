//! Integration tests for device sessions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use devgate_device::{
    format_timestamp, ChannelSink, CloseReason, Device, DeviceError, DeviceOptions, Id, Request,
};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

// ==================== Helper Functions ====================

fn connected_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + chrono::Duration::nanoseconds(123_456_000)
}

fn device_with_uptime(id: &str, queue_size: usize, up_time: chrono::Duration) -> Device {
    let now = connected_at() + up_time;
    Device::new(
        DeviceOptions::new(id)
            .with_queue_size(queue_size)
            .with_connected_at(connected_at())
            .with_clock(Arc::new(move || now)),
    )
}

// ==================== Construction Tests ====================

#[test]
fn test_device_status_json() {
    for (id, queue_size) in [("ID 1", 50), ("ID 2", 27), ("ID 3", 137), ("ID 4", 2)] {
        let device = device_with_uptime(id, queue_size, chrono::Duration::hours(15));

        assert_eq!(device.to_string(), id);
        assert_eq!(device.id(), &Id::new(id));
        assert_eq!(device.statistics().connected_at(), connected_at());
        assert!(!device.is_closed());

        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": id,
                "pending": 0,
                "statistics": {
                    "duplications": 0,
                    "bytesSent": 0,
                    "messagesSent": 0,
                    "bytesReceived": 0,
                    "messagesReceived": 0,
                    "connectedAt": format_timestamp(connected_at()),
                    "upTime": "15h0m0s",
                },
            })
        );
    }
}

#[test]
fn test_connected_at_format() {
    assert_eq!(format_timestamp(connected_at()), "2024-05-01T10:00:00.123456Z");
}

#[test]
fn test_session_ids_differ_for_same_id() {
    let first = Device::new(DeviceOptions::new("1").with_queue_size(10));
    let second = Device::new(DeviceOptions::new("1").with_queue_size(10));

    assert_eq!(first.id(), second.id());
    assert_ne!(first.session_id(), second.session_id());
}

// ==================== Close Tests ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_around_close_all_fail_closed() {
    for queue_size in [2, 27, 50] {
        let device = Arc::new(device_with_uptime("ID 1", queue_size, chrono::Duration::zero()));
        let token = CancellationToken::new();

        let mut senders = Vec::new();
        for _ in 0..queue_size * 2 {
            let device = Arc::clone(&device);
            let token = token.clone();
            senders.push(tokio::spawn(async move {
                device
                    .send(Request::new("message").with_cancellation(token))
                    .await
            }));
        }

        assert!(!device.is_closed());
        device.request_close(CloseReason::shutdown("test"));
        assert!(device.is_closed());
        device.request_close(CloseReason::shutdown("test"));
        assert!(device.is_closed());
        token.cancel();

        for sender in futures::future::join_all(senders).await {
            let result = sender.unwrap();
            assert!(result.is_err());
        }

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            device.send(Request::new("after close")),
        )
        .await
        .unwrap();
        assert_eq!(result, Err(DeviceError::Closed));
        assert_eq!(device.pending(), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sends_blocked_on_full_queue_see_closed() {
    let device = Arc::new(device_with_uptime("ID 1", 2, chrono::Duration::zero()));

    let mut senders = Vec::new();
    for _ in 0..10 {
        let device = Arc::clone(&device);
        senders.push(tokio::spawn(async move { device.send(Request::new("x")).await }));
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while device.pending() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    device.request_close(CloseReason::shutdown("test"));

    let results = tokio::time::timeout(Duration::from_secs(5), futures::future::join_all(senders))
        .await
        .unwrap();
    for result in results {
        assert_eq!(result.unwrap(), Err(DeviceError::Closed));
    }
}

// ==================== Delivery Tests ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_senders_all_delivered() {
    let device = Arc::new(device_with_uptime("ID 1", 4, chrono::Duration::zero()));
    let (mut sink, mut receiver) = ChannelSink::new(64);
    let dispatcher = {
        let device = Arc::clone(&device);
        tokio::spawn(async move { device.dispatch(&mut sink).await })
    };

    let mut senders = Vec::new();
    for i in 0..100u32 {
        let device = Arc::clone(&device);
        senders.push(tokio::spawn(async move {
            device.send(Request::new(i.to_be_bytes().to_vec())).await
        }));
    }
    let drain = tokio::spawn(async move {
        let mut received = 0;
        while receiver.recv().await.is_some() {
            received += 1;
            if received == 100 {
                break;
            }
        }
        received
    });

    for sender in futures::future::join_all(senders).await {
        assert_eq!(sender.unwrap().unwrap().bytes_sent, 4);
    }
    assert_eq!(drain.await.unwrap(), 100);
    assert_eq!(device.statistics().messages_sent(), 100);
    assert_eq!(device.statistics().bytes_sent(), 400);

    device.request_close(CloseReason::shutdown("test"));
    dispatcher.await.unwrap().unwrap();
}

proptest! {
    #[test]
    fn prop_new_device_is_open_with_zero_counters(
        id in "[a-zA-Z0-9 :]{1,24}",
        queue_size in 1usize..512,
        offset_secs in 0i64..1_000_000_000,
    ) {
        let at = Utc.timestamp_opt(offset_secs, 0).unwrap();
        let device = Device::new(
            DeviceOptions::new(id.as_str())
                .with_queue_size(queue_size)
                .with_connected_at(at),
        );

        prop_assert!(!device.is_closed());
        prop_assert!(!device.session_id().to_string().is_empty());
        prop_assert_eq!(device.queue_size(), queue_size);
        prop_assert_eq!(device.statistics().connected_at(), at);
        let snapshot = device.statistics().snapshot();
        prop_assert_eq!(snapshot.bytes_sent, 0);
        prop_assert_eq!(snapshot.messages_sent, 0);
        prop_assert_eq!(snapshot.bytes_received, 0);
        prop_assert_eq!(snapshot.messages_received, 0);
        prop_assert_eq!(snapshot.duplications, 0);
    }
}
