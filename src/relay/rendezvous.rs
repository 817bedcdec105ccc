use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::room::RoomState;
use crate::config::RELAY_CHUNK_SIZE;

/// How a host's wait for a viewer ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendezvous {
    /// A viewer connection is parked in the room
    Paired,
    /// Nobody joined within the wait window
    TimedOut,
    /// The room was torn down underneath us (reaper, shutdown)
    Closed,
    /// The host hung up while waiting
    HostLeft,
}

/// Block a host session until its room is paired, closed, or `limit` elapses.
///
/// The viewer-join path flips the room's state channel, so a pairing is seen
/// as soon as it happens rather than on the next poll. While waiting we also
/// read the host socket so a host that disconnects frees its room right away.
/// Anything the host sends meanwhile is appended to `early` for the relay to
/// forward first; once `early` holds a full relay chunk the host is left to
/// TCP backpressure until a viewer arrives.
pub async fn wait_for_viewer(
    host: &mut TcpStream,
    early: &mut Vec<u8>,
    state: &mut watch::Receiver<RoomState>,
    limit: Duration,
) -> Rendezvous {
    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);

    let mut chunk = [0u8; 4096];

    loop {
        tokio::select! {
            changed = state.wait_for(|s| *s != RoomState::Waiting) => {
                return match changed {
                    Ok(s) if *s == RoomState::Paired => Rendezvous::Paired,
                    _ => Rendezvous::Closed,
                };
            }
            _ = &mut deadline => return Rendezvous::TimedOut,
            read = host.read(&mut chunk), if early.len() < RELAY_CHUNK_SIZE => match read {
                Ok(0) | Err(_) => return Rendezvous::HostLeft,
                Ok(n) => early.extend_from_slice(&chunk[..n]),
            },
        }
    }
}
