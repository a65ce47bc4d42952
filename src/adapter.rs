//! Adapter construction and runtime loop.
//!
//! The [`SocketStreamBuilder`] provides a fluent API for configuring the
//! adapter and building it over a socket connection. The [`SocketStream`] is
//! the consumer-facing duplex handle. Construction:
//! 1. Take the socket's event stream (subscribe)
//! 2. Create the buffered inbound channel and the write command channel
//! 3. Spawn the pump task, which owns the socket exclusively
//!
//! The pump is the one cooperative execution context where every
//! flow-control and lifecycle decision is made:
//!
//! ```text
//! socket events ----+
//! write commands ---+--> select loop --> offer / pause / resume / send
//! ready signals ----+
//! ```
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use sockstream::{socket, SocketStream};
//!
//! let (local, remote) = socket::pair();
//! let mut stream = SocketStream::builder()
//!     .socket(local)
//!     .high_water_mark(8 * 1024)
//!     .build()?;
//!
//! stream.write(bytes::Bytes::from_static(b"hello"))?.await?;
//! while let Some(chunk) = stream.next().await {
//!     println!("got {} bytes", chunk?.len());
//! }
//! ```

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures::{Sink, Stream};
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::duplex::{self, InboundReceiver, InboundSender, Offer};
use crate::error::{Result, SockstreamError};
use crate::flow::{Flow, FlowState};
use crate::socket::{self, Completion, MessageMeta, SocketConnection, SocketEvent, WriteReceipt};

/// Default high-water mark for the readable side, in bytes.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Builder for configuring and creating a [`SocketStream`].
pub struct SocketStreamBuilder<S> {
    socket: Option<S>,
    high_water_mark: usize,
    logger: Option<tracing::Span>,
}

impl<S: SocketConnection> SocketStreamBuilder<S> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            socket: None,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            logger: None,
        }
    }

    /// The connection to adapt. Required.
    pub fn socket(mut self, socket: S) -> Self {
        self.socket = Some(socket);
        self
    }

    /// High-water mark for the readable side, in bytes.
    ///
    /// Passed through verbatim to the buffering primitive.
    /// Default: [`DEFAULT_HIGH_WATER_MARK`].
    pub fn high_water_mark(mut self, bytes: usize) -> Self {
        self.high_water_mark = bytes;
        self
    }

    /// Logging scope for this adapter's diagnostics.
    ///
    /// All `debug`/`error` events the adapter emits are recorded within this
    /// span. Default: a fresh `socket_stream` debug span.
    pub fn logger(mut self, span: tracing::Span) -> Self {
        self.logger = Some(span);
        self
    }

    /// Build the adapter and spawn its pump task.
    ///
    /// Subscribes to the socket's notifications immediately; no data is sent
    /// or requested.
    ///
    /// # Errors
    ///
    /// [`SockstreamError::MissingSocket`] if no socket was supplied.
    pub fn build(self) -> Result<SocketStream> {
        let socket = self.socket.ok_or(SockstreamError::MissingSocket)?;
        Ok(SocketStream::spawn(
            socket,
            self.high_water_mark,
            self.logger,
        ))
    }
}

impl<S: SocketConnection> Default for SocketStreamBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// One write accepted from the consumer, on its way to the socket.
struct WriteCmd {
    payload: Bytes,
    meta: MessageMeta,
    completion: Completion,
}

/// Why the pump loop stopped.
enum Terminal {
    Closed,
    Failed(io::Error),
    ConsumerGone,
}

/// The task owning the socket and running the adapter logic.
struct Pump<S> {
    socket: S,
    events: mpsc::UnboundedReceiver<SocketEvent>,
    cmds: mpsc::UnboundedReceiver<WriteCmd>,
    inbound: InboundSender,
    flow: Flow,
    state_tx: watch::Sender<FlowState>,
}

impl<S: SocketConnection> Pump<S> {
    async fn run(mut self) {
        let terminal = loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(SocketEvent::Message { payload, meta }) => {
                        if !self.on_message(payload, meta) {
                            break Terminal::ConsumerGone;
                        }
                    }
                    Some(SocketEvent::Closed) => break Terminal::Closed,
                    Some(SocketEvent::Error(err)) => break Terminal::Failed(err),
                    None => {
                        tracing::debug!("Socket event stream ended without a close event");
                        break Terminal::Closed;
                    }
                },
                ready = self.inbound.consumer_ready() => match ready {
                    Some(()) => self.on_consumer_ready(),
                    None => break Terminal::ConsumerGone,
                },
                cmd = self.cmds.recv() => match cmd {
                    Some(cmd) => self.on_write(cmd),
                    None => break Terminal::ConsumerGone,
                },
            }
        };
        self.finish(terminal);
    }

    /// Inbound message: log, offer to the buffer, pause on the first
    /// over-capacity report of an episode.
    ///
    /// Returns false once the consumer dropped its read half.
    fn on_message(&mut self, payload: Bytes, meta: MessageMeta) -> bool {
        tracing::debug!(
            "Received message ({} bytes, binary: {})",
            payload.len(),
            meta.binary
        );

        match self.inbound.offer(payload) {
            Offer::Queued { over_capacity } => {
                if over_capacity && self.flow.on_over_capacity() {
                    tracing::debug!(
                        "Pausing inbound delivery ({} bytes buffered)",
                        self.inbound.buffered_bytes()
                    );
                    self.publish_state();
                    self.socket.pause();
                }
                true
            }
            Offer::ConsumerGone => false,
        }
    }

    /// Consumer drained below the high-water mark: resume iff paused.
    fn on_consumer_ready(&mut self) {
        if self.flow.on_consumer_ready() {
            tracing::debug!("Resuming inbound delivery");
            self.publish_state();
            self.socket.resume();
        }
    }

    /// Forward one write to the socket, completion passed through verbatim.
    fn on_write(&mut self, cmd: WriteCmd) {
        tracing::debug!("Forwarding write ({} bytes)", cmd.payload.len());
        self.socket.send(cmd.payload, cmd.meta, cmd.completion);
    }

    /// Terminal sequence: deliver end-of-data or the error, end the writable
    /// side, publish `Closing` then `Closed`, drop the socket.
    fn finish(self, terminal: Terminal) {
        let Pump {
            socket,
            events: _,
            mut cmds,
            inbound,
            mut flow,
            state_tx,
        } = self;

        match terminal {
            Terminal::Closed => {
                tracing::debug!("Socket closed, ending stream");
                inbound.end();
            }
            Terminal::Failed(err) => {
                tracing::error!("Socket error: {}", err);
                inbound.fail(SockstreamError::Io(err));
            }
            Terminal::ConsumerGone => {
                tracing::debug!("Consumer dropped, shutting down");
                drop(inbound);
            }
        }

        flow.on_terminal();
        let _ = state_tx.send(flow.state());

        // No send may reach the socket past this point: commands that raced
        // the close are rejected, their completions resolved.
        cmds.close();
        while let Ok(cmd) = cmds.try_recv() {
            cmd.completion.reject_closed();
        }

        flow.on_shutdown_complete();
        let _ = state_tx.send(flow.state());

        // Dropping the socket releases the transport.
        drop(socket);
    }

    fn publish_state(&self) {
        let _ = self.state_tx.send(self.flow.state());
    }
}

/// A socket connection presented as a flow-controlled duplex stream.
///
/// The readable side implements [`Stream`]: inbound messages in socket
/// order, an `Err` item for a socket-wide error, `None` at end-of-data. The
/// writable side implements [`Sink`] and the direct [`write`](Self::write)
/// operation. Lifecycle is observable through [`state`](Self::state) and
/// [`closed`](Self::closed).
pub struct SocketStream {
    inbound: InboundReceiver,
    cmd_tx: mpsc::UnboundedSender<WriteCmd>,
    state_rx: watch::Receiver<FlowState>,
    in_flight: Option<WriteReceipt>,
    write_ended: bool,
}

impl SocketStream {
    /// Create a builder.
    pub fn builder<S: SocketConnection>() -> SocketStreamBuilder<S> {
        SocketStreamBuilder::new()
    }

    /// Adapt `socket` with default configuration.
    pub fn new<S: SocketConnection>(socket: S) -> Self {
        Self::spawn(socket, DEFAULT_HIGH_WATER_MARK, None)
    }

    fn spawn<S: SocketConnection>(
        mut socket: S,
        high_water_mark: usize,
        logger: Option<tracing::Span>,
    ) -> Self {
        // 1. Subscribe before the pump starts: no event can be missed.
        let events = socket.subscribe();

        // 2. Channels between handle and pump.
        let (inbound_tx, inbound_rx) = duplex::inbound(high_water_mark);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(FlowState::Open);

        // 3. Spawn the pump inside the injected logging scope.
        let span = logger.unwrap_or_else(|| tracing::debug_span!("socket_stream"));
        let pump = Pump {
            socket,
            events,
            cmds: cmd_rx,
            inbound: inbound_tx,
            flow: Flow::new(),
            state_tx,
        };
        tokio::spawn(pump.run().instrument(span));

        Self {
            inbound: inbound_rx,
            cmd_tx,
            state_rx,
            in_flight: None,
            write_ended: false,
        }
    }

    /// Write one chunk with default metadata.
    ///
    /// The returned [`WriteReceipt`] resolves with the socket's own outcome
    /// for this send; dropping it makes the write fire-and-forget.
    ///
    /// # Errors
    ///
    /// [`SockstreamError::WriteAfterClose`] once close or error has been
    /// observed, or after the writable side was ended.
    pub fn write(&self, payload: Bytes) -> Result<WriteReceipt> {
        self.write_with(payload, MessageMeta::default())
    }

    /// Write one chunk with explicit metadata, passed through verbatim.
    pub fn write_with(&self, payload: Bytes, meta: MessageMeta) -> Result<WriteReceipt> {
        if self.write_ended || self.state().is_terminal() {
            return Err(SockstreamError::WriteAfterClose);
        }

        let (completion, receipt) = socket::completion();
        self.cmd_tx
            .send(WriteCmd {
                payload,
                meta,
                completion,
            })
            // The pump only goes away through the close path.
            .map_err(|_| SockstreamError::WriteAfterClose)?;
        Ok(receipt)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FlowState {
        *self.state_rx.borrow()
    }

    /// True once the adapter reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.state() == FlowState::Closed
    }

    /// Wait for the adapter to reach [`FlowState::Closed`].
    ///
    /// This is the close event: it fires even if the consumer never read,
    /// and resolves immediately when already closed.
    pub async fn closed(&self) {
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|state| *state == FlowState::Closed).await;
    }

    /// Bytes queued on the readable side, awaiting pulls.
    pub fn buffered_bytes(&self) -> usize {
        self.inbound.buffered_bytes()
    }

    /// Resolve the write in flight, if any.
    fn poll_in_flight(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        match self.in_flight.as_mut() {
            Some(receipt) => {
                let outcome = ready!(Pin::new(receipt).poll(cx));
                self.in_flight = None;
                Poll::Ready(outcome)
            }
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Stream for SocketStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inbound.poll_pull(cx)
    }
}

/// Writes serialized one at a time: `poll_ready` and `poll_flush` drive the
/// single in-flight completion, `poll_close` flushes it and ends the
/// writable side. A `start_send` issued without `poll_ready` still sends in
/// order; it merely abandons the previous receipt.
impl Sink<Bytes> for SocketStream {
    type Error = SockstreamError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.get_mut().poll_in_flight(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<()> {
        let this = self.get_mut();
        let receipt = this.write(item)?;
        this.in_flight = Some(receipt);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.get_mut().poll_in_flight(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();
        let outcome = ready!(this.poll_in_flight(cx));
        this.write_ended = true;
        Poll::Ready(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::pair;

    #[test]
    fn test_builder_defaults() {
        let builder = SocketStream::builder::<crate::socket::PairSocket>();
        assert!(builder.socket.is_none());
        assert_eq!(builder.high_water_mark, DEFAULT_HIGH_WATER_MARK);
        assert!(builder.logger.is_none());
    }

    #[test]
    fn test_builder_configuration() {
        let (local, _remote) = pair();
        let builder = SocketStream::builder()
            .socket(local)
            .high_water_mark(8)
            .logger(tracing::debug_span!("test"));

        assert!(builder.socket.is_some());
        assert_eq!(builder.high_water_mark, 8);
        assert!(builder.logger.is_some());
    }

    #[test]
    fn test_build_without_socket_fails() {
        let result = SocketStream::builder::<crate::socket::PairSocket>().build();
        assert!(matches!(result, Err(SockstreamError::MissingSocket)));
    }

    #[tokio::test]
    async fn test_construction_sends_nothing() {
        let (local, _remote) = pair();
        let counters = local.counters();

        let stream = SocketStream::new(local);
        tokio::task::yield_now().await;

        assert_eq!(counters.send_calls(), 0);
        assert_eq!(counters.pause_calls(), 0);
        assert_eq!(stream.state(), FlowState::Open);
        assert_eq!(stream.buffered_bytes(), 0);
    }

    #[tokio::test]
    async fn test_writes_racing_close_resolve_not_send() {
        // A write accepted before the terminal event is processed must not
        // reach the socket; its completion resolves with the close error.
        let (mut local, _remote) = pair();
        let counters = local.counters();
        let events = local.subscribe();

        let (inbound_tx, _inbound_rx) = duplex::inbound(DEFAULT_HIGH_WATER_MARK);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(FlowState::Open);

        let pump = Pump {
            socket: local,
            events,
            cmds: cmd_rx,
            inbound: inbound_tx,
            flow: Flow::new(),
            state_tx,
        };

        let (completion, receipt) = socket::completion();
        cmd_tx
            .send(WriteCmd {
                payload: Bytes::from_static(b"raced"),
                meta: MessageMeta::default(),
                completion,
            })
            .unwrap();

        pump.finish(Terminal::Closed);

        assert!(matches!(
            receipt.await,
            Err(SockstreamError::WriteAfterClose)
        ));
        assert_eq!(counters.send_calls(), 0);
        assert_eq!(*state_rx.borrow(), FlowState::Closed);
    }

    #[tokio::test]
    async fn test_write_after_end_of_write_fails() {
        use futures::SinkExt;

        let (local, _remote) = pair();
        let mut stream = SocketStream::new(local);

        stream.close().await.unwrap();
        assert!(matches!(
            stream.write(Bytes::from_static(b"late")),
            Err(SockstreamError::WriteAfterClose)
        ));
    }
}
