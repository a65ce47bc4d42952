//! Flow-control state for one adapter instance.
//!
//! This module owns the pause/resume discipline that reconciles the socket's
//! push model with the consumer's pull model. The state is a small explicit
//! machine, mutated only by the pump task, so no locking is involved.
//!
//! # State machine
//!
//! ```text
//! Open <-> Paused           over-capacity / consumer-ready
//!   |       |
//!   +---+---+
//!       v
//!    Closing -> Closed      close or error observed / both sides terminal
//! ```
//!
//! Transition methods return whether the caller must act on the socket
//! (`pause()` / `resume()`), which is how the at-most-one-pause-per-episode
//! and resume-only-while-paused guarantees are enforced in a single place.

/// Lifecycle state of an adapter instance.
///
/// Observable through [`SocketStream::state`](crate::SocketStream::state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Inbound delivery is flowing; no backpressure episode active.
    Open,
    /// The socket was asked to pause inbound delivery and has not yet been
    /// asked to resume.
    Paused,
    /// Close or error was observed; both sides are shutting down.
    Closing,
    /// Terminal. No transitions exist out of this state.
    Closed,
}

impl FlowState {
    /// True once close or error has been observed (writes are rejected).
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Closing | FlowState::Closed)
    }
}

/// Flow-control state machine, owned by the pump task.
#[derive(Debug)]
pub(crate) struct Flow {
    state: FlowState,
}

impl Flow {
    pub(crate) fn new() -> Self {
        Self {
            state: FlowState::Open,
        }
    }

    /// Current state.
    #[inline]
    pub(crate) fn state(&self) -> FlowState {
        self.state
    }

    /// The inbound buffer reported at-or-above its high-water mark.
    ///
    /// Returns `true` exactly when the caller must issue `socket.pause()`:
    /// only on the `Open -> Paused` edge. Repeated over-capacity reports
    /// while already paused are no-ops; messages may still be queued from
    /// before the pause took effect, so this check is mandatory.
    pub(crate) fn on_over_capacity(&mut self) -> bool {
        match self.state {
            FlowState::Open => {
                self.state = FlowState::Paused;
                true
            }
            _ => false,
        }
    }

    /// The consumer signaled it is ready for more data.
    ///
    /// Returns `true` exactly when the caller must issue `socket.resume()`:
    /// only on the `Paused -> Open` edge. Ready signals while not paused are
    /// no-ops, and a close already observed wins over a late drain.
    pub(crate) fn on_consumer_ready(&mut self) -> bool {
        match self.state {
            FlowState::Paused => {
                self.state = FlowState::Open;
                true
            }
            _ => false,
        }
    }

    /// Close or error was observed on the socket.
    ///
    /// Returns `false` if the adapter was already shutting down (second
    /// terminal notification, tolerated and dropped by the caller).
    pub(crate) fn on_terminal(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = FlowState::Closing;
        true
    }

    /// Both read and write sides reached their terminal state.
    pub(crate) fn on_shutdown_complete(&mut self) {
        self.state = FlowState::Closed;
    }
}
