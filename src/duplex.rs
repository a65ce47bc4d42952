//! Buffered inbound channel between the pump task and the stream consumer.
//!
//! This is the generic duplex-channel machinery the adapter composes with:
//! an unbounded chunk queue whose byte occupancy is tracked against a
//! high-water mark. The pump interacts with it through exactly two control
//! points:
//!
//! - [`InboundSender::offer`]: queue a chunk, learn whether occupancy is now
//!   at or above the high-water mark;
//! - [`InboundSender::consumer_ready`]: be notified when a pull left
//!   occupancy below the mark.
//!
//! ```text
//! pump --offer(chunk)--> [chunk queue | gauge] --pull--> consumer
//!  ^                                                        |
//!  +----------------- ready signal (below mark) ------------+
//! ```
//!
//! The queue itself never rejects a chunk; backpressure is advisory (the
//! pump pauses the socket), which is why occupancy is byte-accounted rather
//! than slot-limited. Terminal delivery consumes the sender, so no chunk can
//! be offered after end-of-data or an error has been queued.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::SockstreamError;

/// Byte occupancy of the inbound queue, shared between pump and consumer.
///
/// Lock-free: the pump reserves on offer, the consumer releases on pull.
#[derive(Debug)]
struct BufferGauge {
    bytes: AtomicUsize,
    high_water_mark: usize,
}

impl BufferGauge {
    fn new(high_water_mark: usize) -> Self {
        Self {
            bytes: AtomicUsize::new(0),
            high_water_mark,
        }
    }

    /// Account for a queued chunk. Returns true when occupancy is now at or
    /// above the high-water mark.
    fn reserve(&self, len: usize) -> bool {
        let total = self.bytes.fetch_add(len, Ordering::AcqRel) + len;
        total >= self.high_water_mark
    }

    /// Account for a delivered chunk. Returns true when occupancy fell below
    /// the high-water mark (or the queue emptied, for a zero mark).
    fn release(&self, len: usize) -> bool {
        let total = self.bytes.fetch_sub(len, Ordering::AcqRel).saturating_sub(len);
        total == 0 || total < self.high_water_mark
    }

    #[inline]
    fn buffered(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }
}

/// Outcome of offering a chunk to the inbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// Chunk queued. `over_capacity` is true when occupancy is now at or
    /// above the high-water mark.
    Queued { over_capacity: bool },
    /// The consumer dropped its read half; the chunk was discarded.
    ConsumerGone,
}

/// Pump-side handle: offers chunks, observes consumer readiness, delivers
/// the terminal marker.
#[derive(Debug)]
pub(crate) struct InboundSender {
    chunk_tx: mpsc::UnboundedSender<Result<Bytes, SockstreamError>>,
    ready_rx: mpsc::Receiver<()>,
    gauge: Arc<BufferGauge>,
}

/// Consumer-side handle: pulls chunks in order, releasing occupancy and
/// signaling readiness as it drains.
#[derive(Debug)]
pub(crate) struct InboundReceiver {
    chunk_rx: mpsc::UnboundedReceiver<Result<Bytes, SockstreamError>>,
    ready_tx: mpsc::Sender<()>,
    gauge: Arc<BufferGauge>,
}

/// Create the inbound channel with the given high-water mark in bytes.
pub(crate) fn inbound(high_water_mark: usize) -> (InboundSender, InboundReceiver) {
    let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
    // Capacity 1: ready signals coalesce; one pending signal already says
    // everything a second one would.
    let (ready_tx, ready_rx) = mpsc::channel(1);
    let gauge = Arc::new(BufferGauge::new(high_water_mark));

    (
        InboundSender {
            chunk_tx,
            ready_rx,
            gauge: gauge.clone(),
        },
        InboundReceiver {
            chunk_rx,
            ready_tx,
            gauge,
        },
    )
}

impl InboundSender {
    /// Queue one chunk for the consumer.
    pub(crate) fn offer(&mut self, chunk: Bytes) -> Offer {
        let len = chunk.len();
        // Reserve before queueing: the consumer may pull (and release) the
        // chunk the moment it lands in the queue, so the bytes must already
        // be on the gauge by then.
        let over_capacity = self.gauge.reserve(len);
        if self.chunk_tx.send(Ok(chunk)).is_err() {
            self.gauge.release(len);
            return Offer::ConsumerGone;
        }
        Offer::Queued { over_capacity }
    }

    /// Wait until the consumer drained below the high-water mark.
    ///
    /// Returns `None` once the consumer dropped its read half.
    pub(crate) async fn consumer_ready(&mut self) -> Option<()> {
        self.ready_rx.recv().await
    }

    /// Current queue occupancy in bytes.
    pub(crate) fn buffered_bytes(&self) -> usize {
        self.gauge.buffered()
    }

    /// Deliver end-of-data. Queued chunks drain first; the consumer then
    /// observes the end of the stream.
    pub(crate) fn end(self) {
        // Dropping the sender closes the channel behind the queued chunks.
    }

    /// Deliver a socket-wide error, then end-of-data.
    pub(crate) fn fail(self, err: SockstreamError) {
        let _ = self.chunk_tx.send(Err(err));
    }
}

impl InboundReceiver {
    /// Pull the next chunk, releasing its bytes from the gauge and signaling
    /// readiness once occupancy is below the high-water mark.
    ///
    /// `None` is the end-of-data marker; an `Err` item carries the
    /// socket-wide error, after which only end-of-data remains.
    pub(crate) fn poll_pull(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, SockstreamError>>> {
        match self.chunk_rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if self.gauge.release(chunk.len()) {
                    // Full channel means a signal is already pending.
                    let _ = self.ready_tx.try_send(());
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Current queue occupancy in bytes.
    pub(crate) fn buffered_bytes(&self) -> usize {
        self.gauge.buffered()
    }
}
