//! Bidirectional byte relay between the client and the upstream target
//! (spec.md §4.5), run once the CONNECT reply has been sent.

use std::io;
use tokio::net::TcpStream;

/// Bytes moved in each direction once the relay ends (either by both sides
/// reaching EOF, or by one side erroring).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    pub client_to_target: u64,
    pub target_to_client: u64,
}

/// Shuttles bytes between `client` and `target` until both directions have
/// reached EOF, then returns. Each direction is driven independently by
/// `tokio::io::copy`, which already half-closes its destination write side
/// once its source reaches EOF.
///
/// Unlike a `tokio::select!` over both directions — which would drop
/// whichever copy is still in flight the moment the other finishes — this
/// uses `try_join!` so a client that closes its write side early does not
/// truncate an in-flight response still streaming from the target
/// (spec.md §9 "Half-close").
pub async fn relay(client: TcpStream, target: TcpStream) -> io::Result<RelayOutcome> {
    let (mut client_read, mut client_write) = client.into_split();
    let (mut target_read, mut target_write) = target.into_split();

    let client_to_target = tokio::io::copy(&mut client_read, &mut target_write);
    let target_to_client = tokio::io::copy(&mut target_read, &mut client_write);

    let (client_to_target, target_to_client) = tokio::try_join!(client_to_target, target_to_client)?;

    Ok(RelayOutcome {
        client_to_target,
        target_to_client,
    })
}
