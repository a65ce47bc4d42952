//! Backpressure over a small high-water mark, step by step.
//!
//! This example demonstrates:
//! - Configuring the high-water mark and injecting a logging span
//! - One pause per overload episode, one resume per drain
//! - Close propagating end-of-data and the close event
//!
//! Run with `RUST_LOG=sockstream=debug` to watch the adapter's decisions.

use std::error::Error;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use sockstream::socket::{self, pair};
use sockstream::{MessageMeta, SocketConnection, SocketStream};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sockstream=debug,info")),
        )
        .init();

    let (local, mut remote) = pair();
    let counters = local.counters();

    let mut stream = SocketStream::builder()
        .socket(local)
        .high_water_mark(64)
        .logger(tracing::debug_span!("demo"))
        .build()?;

    // A remote peer floods us before we read anything.
    for i in 0..10 {
        let (completion, _receipt) = socket::completion();
        remote.send(
            Bytes::from(format!("oversized message number {:02} ............", i)),
            MessageMeta::default(),
            completion,
        );
    }

    // Let the adapter absorb the burst
    tokio::time::sleep(Duration::from_millis(10)).await;
    info!(
        "Burst absorbed: {} bytes buffered, {} pause(s)",
        stream.buffered_bytes(),
        counters.pause_calls()
    );

    // Drain; crossing below the mark resumes the socket once
    while stream.buffered_bytes() > 0 {
        let chunk = stream.next().await.expect("stream ended early")?;
        info!("Drained one chunk ({} bytes)", chunk.len());
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    info!(
        "After the drain: {} pause(s), {} resume(s)",
        counters.pause_calls(),
        counters.resume_calls()
    );

    // The remote closes; end-of-data and the close event both arrive
    remote.close();
    assert!(stream.next().await.is_none());
    stream.closed().await;
    info!("Closed, final state: {:?}", stream.state());

    Ok(())
}
