//! The write side of a device connection.

use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::request::Request;

/// Errors reported by a [`TransportSink`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// The write failed.
    #[error("write failed: {0}")]
    Write(String),
}

/// Writes requests to the underlying connection.
///
/// The device's dispatch loop calls `write` once per dequeued request, in
/// queue order, and only counts a request as sent when it returns `Ok`.
pub trait TransportSink: Send {
    /// Writes one request, returning the number of bytes written.
    fn write(&mut self, request: &Request) -> impl Future<Output = Result<usize, TransportError>> + Send;
}

/// A sink that forwards payloads into an mpsc channel.
///
/// Used where the real connection lives in another task, and in tests.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<Vec<u8>>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that observes written payloads.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }
}

impl TransportSink for ChannelSink {
    async fn write(&mut self, request: &Request) -> Result<usize, TransportError> {
        let len = request.len();
        self.sender
            .send(request.payload().to_vec())
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_forwards_payload() {
        let (mut sink, mut receiver) = ChannelSink::new(4);
        let written = sink.write(&Request::new("hello")).await.unwrap();

        assert_eq!(written, 5);
        assert_eq!(receiver.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_connection() {
        let (mut sink, receiver) = ChannelSink::new(4);
        drop(receiver);

        assert_eq!(
            sink.write(&Request::new("hello")).await,
            Err(TransportError::ConnectionClosed)
        );
    }
}
