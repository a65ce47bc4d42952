//! Echo over a connected in-memory socket pair.
//!
//! This example demonstrates:
//! - Adapting both ends of a socket pair with the builder pattern
//! - Writing with a receipt and reading through the `Stream` face
//! - A peer task echoing every chunk straight back

use bytes::Bytes;
use futures::StreamExt;
use sockstream::{socket, SocketStream};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (local, remote) = socket::pair();

    // Adapt both ends of the pair
    let mut stream = SocketStream::builder().socket(local).build()?;
    let mut peer = SocketStream::builder().socket(remote).build()?;

    // Echo loop on the peer end
    tokio::spawn(async move {
        while let Some(chunk) = peer.next().await {
            let Ok(chunk) = chunk else { break };
            // Receipt dropped: the echo is fire-and-forget
            if peer.write(chunk).is_err() {
                break;
            }
        }
    });

    for text in ["hello", "streams", "goodbye"] {
        // Wait for the socket to take the message before reading the echo
        stream.write(Bytes::from(text))?.await?;

        let echoed = stream.next().await.expect("echo ended early")?;
        println!("sent {:?}, got back {:?}", text, echoed);
    }

    Ok(())
}
