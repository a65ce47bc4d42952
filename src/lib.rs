//! # sockstream
//!
//! Duplex stream adapter for message-oriented, event-driven socket
//! connections.
//!
//! This crate bridges two I/O styles: a socket that pushes messages and
//! accepts `send` calls, and a consumer that wants a flow-controlled
//! [`Stream`](futures::Stream)/[`Sink`](futures::Sink) pair. Inbound
//! messages are buffered up to a high-water mark; past it the socket is
//! paused once per episode and resumed when the consumer drains. Close and
//! error propagate to both sides of the stream even if nothing was ever
//! read or written.
//!
//! ## Architecture
//!
//! - **Handle** ([`SocketStream`]): the consumer-facing duplex stream
//! - **Pump**: a spawned task owning the socket, where every flow-control
//!   and lifecycle decision is made
//!
//! ## Example
//!
//! ```ignore
//! use bytes::Bytes;
//! use futures::StreamExt;
//! use sockstream::{socket, SocketStream};
//!
//! #[tokio::main]
//! async fn main() -> sockstream::Result<()> {
//!     let (local, remote) = socket::pair();
//!     let mut stream = SocketStream::builder().socket(local).build()?;
//!     let mut peer = SocketStream::builder().socket(remote).build()?;
//!
//!     stream.write(Bytes::from_static(b"hello"))?.await?;
//!     let echoed = peer.next().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod socket;

mod adapter;
mod duplex;
mod flow;

pub use adapter::{SocketStream, SocketStreamBuilder, DEFAULT_HIGH_WATER_MARK};
pub use error::{Result, SockstreamError};
pub use flow::FlowState;
pub use socket::{Completion, MessageMeta, SocketConnection, SocketEvent, WriteReceipt};
