//! Error types for sockstream.

use thiserror::Error;

/// Main error type for all sockstream operations.
#[derive(Debug, Error)]
pub enum SockstreamError {
    /// Builder finished without a socket connection.
    #[error("Socket connection is required")]
    MissingSocket,

    /// Transport-level I/O error reported by the socket.
    ///
    /// On a [`WriteReceipt`](crate::WriteReceipt) this is the failure of that
    /// one send. As an `Err` item on the readable side it is the socket-wide
    /// error event, carried unchanged.
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Write issued after the socket closed or the writable side ended.
    #[error("Write after close")]
    WriteAfterClose,

    /// The socket discarded a send completion without resolving it.
    #[error("Send completion dropped")]
    CompletionDropped,
}

/// Result type alias using SockstreamError.
pub type Result<T> = std::result::Result<T, SockstreamError>;
