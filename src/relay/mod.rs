//! Rendezvous and relay engine
//!
//! A host connects and is handed a room code; a viewer connects with that
//! code and the two sockets are pumped into each other until one side hangs
//! up.
//!
//! ```text
//!   host ──handshake──► Session ──create──► RoomTable ◄──join/attach── Session ◄──handshake── viewer
//!                          │                   │ watch<RoomState>
//!                          ▼                   ▼
//!                   wait_for_viewer ◄──── Paired / Closed ◄──── Reaper
//!                          │
//!                          ▼
//!                  host ─► Pump ─► viewer
//!                  host ◄─ Pump ◄─ viewer
//! ```

pub mod code;
pub mod handshake;
pub mod pump;
pub mod reaper;
pub mod rendezvous;
pub mod room;
mod server;
mod session;

pub use room::{JoinError, RoomTable};
pub use server::RelayServer;

#[cfg(test)]
pub(crate) mod test_util {
    use tokio::net::{TcpListener, TcpStream};

    /// Returns a connected (server side, client side) pair over loopback
    pub async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (accepted.unwrap().0, client.unwrap())
    }
}
