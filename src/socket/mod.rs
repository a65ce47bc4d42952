//! Socket connection contract consumed by the adapter.
//!
//! A wrapped connection is message oriented and event driven: it pushes
//! [`SocketEvent`]s at its own pace, accepts sends with an asynchronous
//! [`Completion`], and honors advisory [`pause`](SocketConnection::pause) /
//! [`resume`](SocketConnection::resume) requests. It has no inbound
//! backpressure contract of its own; that is exactly what the adapter adds.
//!
//! The module also ships [`pair`], an in-memory connected pair used by the
//! test suite and the demos in place of a real transport.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::SockstreamError;

mod pair;

pub use pair::{pair, PairCounters, PairSocket};

/// Encoding metadata attached to one message.
///
/// Carried alongside payloads in both directions and logged, never
/// semantically inspected by the adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageMeta {
    /// True for binary payloads, false for text.
    pub binary: bool,
}

/// Notification pushed by a socket connection.
#[derive(Debug)]
pub enum SocketEvent {
    /// One inbound message, in transport order.
    Message {
        /// The message payload, forwarded verbatim to the consumer.
        payload: Bytes,
        /// Encoding metadata for the payload.
        meta: MessageMeta,
    },
    /// The connection closed. No `Message` should follow.
    Closed,
    /// A connection-wide transport error. No `Message` should follow.
    Error(io::Error),
}

/// Completion callback for one send.
///
/// Handed to [`SocketConnection::send`] and resolved by the transport with
/// that send's outcome; the outcome surfaces on the matching
/// [`WriteReceipt`]. Resolve it exactly once: dropping it unresolved
/// reports [`SockstreamError::CompletionDropped`] to the writer.
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<Result<(), SockstreamError>>,
}

impl Completion {
    /// The send was handed to the transport successfully.
    pub fn done(self) {
        let _ = self.tx.send(Ok(()));
    }

    /// The transport rejected this send.
    pub fn fail(self, err: io::Error) {
        let _ = self.tx.send(Err(SockstreamError::Io(err)));
    }

    /// Resolve from an `io::Result`, for transports that already have one.
    pub fn resolve(self, result: io::Result<()>) {
        match result {
            Ok(()) => self.done(),
            Err(err) => self.fail(err),
        }
    }

    /// Reject a write that raced the close path.
    pub(crate) fn reject_closed(self) {
        let _ = self.tx.send(Err(SockstreamError::WriteAfterClose));
    }
}

/// Future resolving with the socket's outcome for one accepted write.
///
/// Dropping the receipt is allowed (fire-and-forget writes); the send still
/// happens.
#[derive(Debug)]
pub struct WriteReceipt {
    rx: oneshot::Receiver<Result<(), SockstreamError>>,
}

impl Future for WriteReceipt {
    type Output = Result<(), SockstreamError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(outcome) => outcome,
            Err(_) => Err(SockstreamError::CompletionDropped),
        })
    }
}

/// Create a linked completion/receipt pair.
///
/// The adapter does this for every accepted write; it is public so custom
/// [`SocketConnection`] implementations can be exercised standalone.
pub fn completion() -> (Completion, WriteReceipt) {
    let (tx, rx) = oneshot::channel();
    (Completion { tx }, WriteReceipt { rx })
}

/// Contract a wrapped socket connection must satisfy.
///
/// The adapter is the connection's only driver: it takes the event stream
/// once at construction and is the sole caller of `send`/`pause`/`resume`
/// afterwards. The pause bookkeeping depends on that exclusivity, so a
/// connection must not be shared with other components.
pub trait SocketConnection: Send + 'static {
    /// Hand over the connection's event stream.
    ///
    /// Called once, at adapter construction. Events must be delivered in
    /// transport order.
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SocketEvent>;

    /// Queue one outbound message and resolve `completion` with its outcome.
    fn send(&mut self, payload: Bytes, meta: MessageMeta, completion: Completion);

    /// Ask the connection to stop delivering inbound messages.
    ///
    /// Advisory: events already emitted may still arrive after the call.
    fn pause(&mut self);

    /// Undo a previous [`pause`](SocketConnection::pause).
    fn resume(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_done_resolves_receipt() {
        let (done, receipt) = completion();
        done.done();
        assert!(receipt.await.is_ok());
    }

    #[tokio::test]
    async fn test_completion_fail_carries_error() {
        let (done, receipt) = completion();
        done.fail(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));

        match receipt.await {
            Err(SockstreamError::Io(err)) => {
                assert_eq!(err.kind(), io::ErrorKind::ConnectionReset)
            }
            other => panic!("expected Io error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_completion_reported() {
        let (done, receipt) = completion();
        drop(done);

        assert!(matches!(
            receipt.await,
            Err(SockstreamError::CompletionDropped)
        ));
    }

    #[tokio::test]
    async fn test_resolve_maps_io_result() {
        let (done, receipt) = completion();
        done.resolve(Ok(()));
        assert!(receipt.await.is_ok());

        let (done, receipt) = completion();
        done.resolve(Err(io::Error::new(io::ErrorKind::WouldBlock, "full")));
        assert!(matches!(receipt.await, Err(SockstreamError::Io(_))));
    }
}
