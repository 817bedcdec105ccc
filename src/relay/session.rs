use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;

use super::code::is_well_formed;
use super::handshake::{read_handshake, send_response, Handshake, Response, Role};
use super::pump::relay;
use super::rendezvous::{wait_for_viewer, Rendezvous};
use super::room::{Endpoint, JoinError, RoomTable};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    HostWaiting,
    ViewerJoining,
    Relaying,
    Closed,
}

/// Control logic for one accepted relay connection
pub struct Session {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    table: Arc<RoomTable>,
    config: Arc<RelayConfig>,
    state: SessionState,
}

impl Session {
    pub fn new(
        id: u64,
        stream: TcpStream,
        peer: SocketAddr,
        table: Arc<RoomTable>,
        config: Arc<RelayConfig>,
    ) -> Self {
        Self {
            id,
            peer,
            stream,
            table,
            config,
            state: SessionState::AwaitingHandshake,
        }
    }

    /// Drive the connection to completion. The socket is closed when this
    /// returns, unless it was handed into a room.
    pub async fn run(mut self) -> Result<()> {
        let (handshake, pending) =
            read_handshake(&mut self.stream, self.config.handshake_timeout).await?;

        tracing::debug!(
            session_id = self.id,
            peer = %self.peer,
            role = ?handshake.role,
            "Handshake received"
        );

        match handshake.role {
            Role::Host => self.run_host(handshake, pending).await,
            Role::Viewer => self.run_viewer(handshake, pending).await,
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(session_id = self.id, from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }

    async fn run_host(mut self, handshake: Handshake, mut pending: Vec<u8>) -> Result<()> {
        self.transition(SessionState::HostWaiting);

        let password = handshake.password().map(str::to_string);
        let (code, mut room) = self.table.create(password, self.peer).await?;

        if let Err(e) = send_response(&mut self.stream, &Response::ok(&code)).await {
            self.table.teardown(&code).await;
            return Err(e);
        }

        let waited = wait_for_viewer(
            &mut self.stream,
            &mut pending,
            &mut room,
            self.config.rendezvous_timeout,
        )
        .await;

        match waited {
            Rendezvous::Paired => {}
            Rendezvous::TimedOut => {
                self.table.teardown(&code).await;
                return Err(RelayError::RendezvousTimeout(code));
            }
            Rendezvous::HostLeft => {
                self.table.teardown(&code).await;
                tracing::info!(room_code = %code, "Host left before a viewer joined");
                return Ok(());
            }
            Rendezvous::Closed => return Err(RelayError::RoomClosed(code)),
        }

        let Some(viewer) = self.table.take_viewer(&code).await else {
            return Err(RelayError::RoomClosed(code));
        };

        self.transition(SessionState::Relaying);
        let host = Endpoint {
            stream: self.stream,
            peer: self.peer,
            pending,
        };
        let (up, down) = relay(&self.table, &code, host, viewer, room, &self.config).await;

        tracing::info!(
            session_id = self.id,
            room_code = %code,
            host_to_viewer = up.bytes,
            viewer_to_host = down.bytes,
            host_to_viewer_end = ?up.end,
            viewer_to_host_end = ?down.end,
            "Session closed"
        );
        Ok(())
    }

    async fn run_viewer(mut self, handshake: Handshake, pending: Vec<u8>) -> Result<()> {
        self.transition(SessionState::ViewerJoining);

        let joined = match handshake.room_code().filter(|code| is_well_formed(code)) {
            Some(code) => self
                .table
                .join(&code, handshake.password())
                .await
                .map(|()| code),
            None => Err(JoinError::RoomNotFound),
        };

        let code = match joined {
            Ok(code) => code,
            Err(err) => {
                tracing::info!(
                    peer = %self.peer,
                    room_code = ?handshake.room_code,
                    reason = %err,
                    "Viewer rejected"
                );
                send_response(&mut self.stream, &Response::rejected(&err)).await?;
                self.transition(SessionState::Closed);
                return Err(err.into());
            }
        };

        if let Err(e) = send_response(&mut self.stream, &Response::ok(&code)).await {
            // The slot is reserved for us, so nobody else can use this room now
            self.table.teardown(&code).await;
            return Err(e);
        }

        self.transition(SessionState::Relaying);
        let viewer = Endpoint {
            stream: self.stream,
            peer: self.peer,
            pending,
        };
        if self.table.attach_viewer(&code, viewer).await.is_err() {
            return Err(RelayError::RoomClosed(code));
        }

        tracing::info!(room_code = %code, viewer = %self.peer, "Viewer joined room");
        Ok(())
    }
}
