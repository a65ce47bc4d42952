//! In-memory connected socket pair.
//!
//! Two [`PairSocket`] ends joined by shared state: a send on one end surfaces
//! as a [`SocketEvent::Message`] on the other. While an end is paused, traffic
//! addressed to it is held back (the transport's buffer, standing in for a
//! kernel socket buffer) and flushed on resume. This is the transport the
//! integration tests and demos run against instead of a real server.
//!
//! # Example
//!
//! ```ignore
//! use sockstream::socket::{pair, SocketConnection};
//!
//! let (local, mut remote) = pair();
//! let counters = local.counters();
//! let stream = sockstream::SocketStream::new(local);
//! // remote stays in the test to drive traffic and assert on `counters`.
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Completion, MessageMeta, SocketConnection, SocketEvent};

/// Call counters for one [`PairSocket`] end.
///
/// Clone this before handing the socket to an adapter; the counters keep
/// counting after the socket has been moved.
#[derive(Debug, Clone)]
pub struct PairCounters {
    pauses: Arc<AtomicUsize>,
    resumes: Arc<AtomicUsize>,
    sends: Arc<AtomicUsize>,
}

impl PairCounters {
    fn new() -> Self {
        Self {
            pauses: Arc::new(AtomicUsize::new(0)),
            resumes: Arc::new(AtomicUsize::new(0)),
            sends: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `pause()` calls this end has received.
    pub fn pause_calls(&self) -> usize {
        self.pauses.load(Ordering::Acquire)
    }

    /// Number of `resume()` calls this end has received.
    pub fn resume_calls(&self) -> usize {
        self.resumes.load(Ordering::Acquire)
    }

    /// Number of `send()` calls this end has received.
    pub fn send_calls(&self) -> usize {
        self.sends.load(Ordering::Acquire)
    }
}

/// Per-end transport state.
#[derive(Debug)]
struct Side {
    /// Event stream into this end's subscriber.
    events: mpsc::UnboundedSender<SocketEvent>,
    /// This end asked for its inbound delivery to stop.
    paused: bool,
    /// Traffic addressed to this end while it was paused.
    holdback: VecDeque<(Bytes, MessageMeta)>,
    /// Injected failure for this end's next send.
    send_error: Option<io::Error>,
}

#[derive(Debug)]
struct Shared {
    sides: [Side; 2],
    closed: bool,
}

/// One end of an in-memory connected pair.
#[derive(Debug)]
pub struct PairSocket {
    shared: Arc<Mutex<Shared>>,
    index: usize,
    events_rx: Option<mpsc::UnboundedReceiver<SocketEvent>>,
    counters: PairCounters,
}

/// Create a connected socket pair.
pub fn pair() -> (PairSocket, PairSocket) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();

    let shared = Arc::new(Mutex::new(Shared {
        sides: [
            Side {
                events: tx_a,
                paused: false,
                holdback: VecDeque::new(),
                send_error: None,
            },
            Side {
                events: tx_b,
                paused: false,
                holdback: VecDeque::new(),
                send_error: None,
            },
        ],
        closed: false,
    }));

    let a = PairSocket {
        shared: shared.clone(),
        index: 0,
        events_rx: Some(rx_a),
        counters: PairCounters::new(),
    };
    let b = PairSocket {
        shared,
        index: 1,
        events_rx: Some(rx_b),
        counters: PairCounters::new(),
    };
    (a, b)
}

impl PairSocket {
    /// Call counters for this end.
    pub fn counters(&self) -> PairCounters {
        self.counters.clone()
    }

    /// Close the pair. Both ends observe [`SocketEvent::Closed`]; held-back
    /// traffic is discarded; later sends fail with `BrokenPipe`.
    ///
    /// Idempotent.
    pub fn close(&self) {
        let mut shared = self.shared.lock();
        if shared.closed {
            return;
        }
        shared.closed = true;
        for side in shared.sides.iter_mut() {
            side.holdback.clear();
            let _ = side.events.send(SocketEvent::Closed);
        }
    }

    /// Surface a transport fault to the other end as
    /// [`SocketEvent::Error`]. The pair stays open; combine with
    /// [`close`](PairSocket::close) to exercise error-then-close sequences.
    pub fn inject_error(&self, err: io::Error) {
        let shared = self.shared.lock();
        let _ = shared.sides[1 - self.index].events.send(SocketEvent::Error(err));
    }

    /// Make this end's next send fail with `err`.
    pub fn fail_next_send(&self, err: io::Error) {
        self.shared.lock().sides[self.index].send_error = Some(err);
    }
}

impl SocketConnection for PairSocket {
    /// A second subscription observes an already-closed event stream.
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SocketEvent> {
        self.events_rx
            .take()
            .unwrap_or_else(|| mpsc::unbounded_channel().1)
    }

    fn send(&mut self, payload: Bytes, meta: MessageMeta, completion: Completion) {
        self.counters.sends.fetch_add(1, Ordering::AcqRel);

        let mut shared = self.shared.lock();
        if shared.closed {
            completion.fail(io::Error::new(io::ErrorKind::BrokenPipe, "pair closed"));
            return;
        }
        if let Some(err) = shared.sides[self.index].send_error.take() {
            completion.fail(err);
            return;
        }

        let peer = &mut shared.sides[1 - self.index];
        if peer.paused {
            peer.holdback.push_back((payload, meta));
        } else {
            let _ = peer.events.send(SocketEvent::Message { payload, meta });
        }
        completion.done();
    }

    fn pause(&mut self) {
        self.counters.pauses.fetch_add(1, Ordering::AcqRel);
        self.shared.lock().sides[self.index].paused = true;
    }

    fn resume(&mut self) {
        self.counters.resumes.fetch_add(1, Ordering::AcqRel);

        let mut shared = self.shared.lock();
        let side = &mut shared.sides[self.index];
        side.paused = false;
        while let Some((payload, meta)) = side.holdback.pop_front() {
            let _ = side.events.send(SocketEvent::Message { payload, meta });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::completion;

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (mut a, mut b) = pair();
        let mut b_events = b.subscribe();

        let (done, receipt) = completion();
        a.send(Bytes::from_static(b"hello"), MessageMeta::default(), done);
        receipt.await.unwrap();

        match b_events.recv().await.unwrap() {
            SocketEvent::Message { payload, .. } => assert_eq!(payload, "hello"),
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_paused_end_holds_traffic_until_resume() {
        let (mut a, mut b) = pair();
        let mut b_events = b.subscribe();

        b.pause();
        let (done, receipt) = completion();
        a.send(Bytes::from_static(b"held"), MessageMeta::default(), done);
        // The sender's completion is unaffected by the peer's pause.
        receipt.await.unwrap();
        assert!(b_events.try_recv().is_err());

        b.resume();
        match b_events.recv().await.unwrap() {
            SocketEvent::Message { payload, .. } => assert_eq!(payload, "held"),
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resume_preserves_holdback_order() {
        let (mut a, mut b) = pair();
        let mut b_events = b.subscribe();

        b.pause();
        for chunk in [&b"one"[..], b"two", b"three"] {
            let (done, _receipt) = completion();
            a.send(Bytes::copy_from_slice(chunk), MessageMeta::default(), done);
        }
        b.resume();

        for expected in ["one", "two", "three"] {
            match b_events.recv().await.unwrap() {
                SocketEvent::Message { payload, .. } => assert_eq!(payload, expected),
                other => panic!("expected message, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_close_notifies_both_ends() {
        let (mut a, mut b) = pair();
        let mut a_events = a.subscribe();
        let mut b_events = b.subscribe();

        a.close();
        assert!(matches!(a_events.recv().await, Some(SocketEvent::Closed)));
        assert!(matches!(b_events.recv().await, Some(SocketEvent::Closed)));

        // Idempotent: a second close emits nothing further.
        a.close();
        assert!(b_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (mut a, b) = pair();
        b.close();

        let (done, receipt) = completion();
        a.send(Bytes::from_static(b"late"), MessageMeta::default(), done);
        match receipt.await {
            Err(crate::SockstreamError::Io(err)) => {
                assert_eq!(err.kind(), io::ErrorKind::BrokenPipe)
            }
            other => panic!("expected BrokenPipe, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fail_next_send() {
        let (mut a, _b) = pair();
        a.fail_next_send(io::Error::new(io::ErrorKind::WouldBlock, "full"));

        let (done, receipt) = completion();
        a.send(Bytes::from_static(b"x"), MessageMeta::default(), done);
        match receipt.await {
            Err(crate::SockstreamError::Io(err)) => {
                assert_eq!(err.kind(), io::ErrorKind::WouldBlock)
            }
            other => panic!("expected WouldBlock, got {:?}", other),
        }

        // Only the next send fails.
        let (done, receipt) = completion();
        a.send(Bytes::from_static(b"y"), MessageMeta::default(), done);
        receipt.await.unwrap();
    }

    #[tokio::test]
    async fn test_inject_error_reaches_peer() {
        let (a, mut b) = pair();
        let mut b_events = b.subscribe();

        a.inject_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        match b_events.recv().await.unwrap() {
            SocketEvent::Error(err) => assert_eq!(err.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_counters_track_calls() {
        let (mut a, _b) = pair();
        let counters = a.counters();

        a.pause();
        a.resume();
        a.pause();
        let (done, _receipt) = completion();
        a.send(Bytes::from_static(b"x"), MessageMeta::default(), done);

        assert_eq!(counters.pause_calls(), 2);
        assert_eq!(counters.resume_calls(), 1);
        assert_eq!(counters.send_calls(), 1);
    }

    #[tokio::test]
    async fn test_second_subscribe_is_closed() {
        let (mut a, _b) = pair();
        let _first = a.subscribe();

        let mut second = a.subscribe();
        assert!(second.recv().await.is_none());
    }
}
