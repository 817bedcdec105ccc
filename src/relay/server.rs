use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use super::room::RoomTable;
use super::session::Session;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

/// Accepts relay connections and gives each its own session task
pub struct RelayServer {
    config: Arc<RelayConfig>,
    table: Arc<RoomTable>,
    next_session_id: AtomicU64,
}

impl RelayServer {
    pub fn new(config: RelayConfig, table: Arc<RoomTable>) -> Self {
        Self {
            config: Arc::new(config),
            table,
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn table(&self) -> &Arc<RoomTable> {
        &self.table
    }

    /// Bind `addr` and serve until `shutdown` resolves
    pub async fn run_until<F>(&self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "Relay server listening");

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.serve(listener) => result,
        }
    }

    /// Accept loop over an already bound listener. Never returns on its own.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(session_id = session_id, peer = %peer_addr, "New connection");

        // Relayed traffic is often interactive
        if let Err(e) = socket.set_nodelay(true) {
            tracing::warn!(session_id = session_id, error = %e, "Failed to set TCP_NODELAY");
        }

        let session = Session::new(
            session_id,
            socket,
            peer_addr,
            Arc::clone(&self.table),
            Arc::clone(&self.config),
        );

        tokio::spawn(async move {
            match session.run().await {
                Ok(()) => {}
                Err(e) if e.is_viewer_facing() || matches!(e, RelayError::RendezvousTimeout(_)) => {
                    tracing::info!(session_id = session_id, reason = %e, "Session ended");
                }
                Err(e) => {
                    tracing::debug!(session_id = session_id, error = %e, "Connection error");
                }
            }

            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }
}
