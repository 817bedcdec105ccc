use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use super::room::{Endpoint, RoomState, RoomTable};
use crate::config::RelayConfig;

/// Why a pump stopped forwarding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    /// Source sent EOF
    PeerClosed,
    ReadFailed,
    WriteFailed,
    /// The other direction (or the reaper) tore the room down
    RoomClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpReport {
    pub direction: &'static str,
    pub bytes: u64,
    pub end: PumpEnd,
}

/// One direction of a relay
#[derive(Debug, Clone)]
pub struct Pump {
    pub room_code: String,
    pub direction: &'static str,
    pub read_timeout: Duration,
    pub chunk_size: usize,
}

impl Pump {
    pub fn new(room_code: &str, direction: &'static str, config: &RelayConfig) -> Self {
        Self {
            room_code: room_code.to_string(),
            direction,
            read_timeout: config.read_timeout,
            chunk_size: config.chunk_size,
        }
    }

    /// Copy `source` into `destination` until either side fails, the source
    /// reaches EOF, or the room is closed. `pending` is written first.
    pub async fn run<R, W>(
        &self,
        mut source: R,
        mut destination: W,
        pending: &[u8],
        mut room: watch::Receiver<RoomState>,
    ) -> PumpReport
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(
            room_code = %self.room_code,
            direction = self.direction,
            "Relay started"
        );

        let mut bytes = 0u64;
        let end = self
            .forward(&mut source, &mut destination, pending, &mut room, &mut bytes)
            .await;

        tracing::info!(
            room_code = %self.room_code,
            direction = self.direction,
            bytes = bytes,
            reason = ?end,
            "Relay ended"
        );

        PumpReport {
            direction: self.direction,
            bytes,
            end,
        }
    }

    async fn forward<R, W>(
        &self,
        source: &mut R,
        destination: &mut W,
        pending: &[u8],
        room: &mut watch::Receiver<RoomState>,
        bytes: &mut u64,
    ) -> PumpEnd
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if !pending.is_empty() {
            if let Err(e) = destination.write_all(pending).await {
                tracing::debug!(room_code = %self.room_code, error = %e, "Relay write failed");
                return PumpEnd::WriteFailed;
            }
            *bytes += pending.len() as u64;
        }

        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let read = tokio::select! {
                biased;
                _ = room_closed(room) => return PumpEnd::RoomClosed,
                read = tokio::time::timeout(self.read_timeout, source.read(&mut buf)) => read,
            };

            let n = match read {
                // Quiet peer; loop around and re-check the room
                Err(_) => continue,
                Ok(Ok(0)) => return PumpEnd::PeerClosed,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    tracing::debug!(room_code = %self.room_code, error = %e, "Relay read failed");
                    return PumpEnd::ReadFailed;
                }
            };

            let written = tokio::select! {
                biased;
                _ = room_closed(room) => return PumpEnd::RoomClosed,
                written = destination.write_all(&buf[..n]) => written,
            };

            if let Err(e) = written {
                tracing::debug!(room_code = %self.room_code, error = %e, "Relay write failed");
                return PumpEnd::WriteFailed;
            }
            *bytes += n as u64;
        }
    }
}

async fn room_closed(room: &mut watch::Receiver<RoomState>) {
    // A dropped sender means the room is gone too
    let _ = room.wait_for(|s| *s == RoomState::Closed).await;
}

/// Run both directions between a paired host and viewer until they finish.
///
/// Whichever pump stops first tears the room down, which stops the other.
/// The loser of that race finds the room already gone; that is expected.
/// Both sockets close when their halves drop at the end of this call.
pub async fn relay(
    table: &RoomTable,
    code: &str,
    host: Endpoint,
    viewer: Endpoint,
    room: watch::Receiver<RoomState>,
    config: &RelayConfig,
) -> (PumpReport, PumpReport) {
    tracing::info!(
        room_code = %code,
        host = %host.peer,
        viewer = %viewer.peer,
        "Relaying"
    );

    let (host_read, host_write) = host.stream.into_split();
    let (viewer_read, viewer_write) = viewer.stream.into_split();

    let upstream = Pump::new(code, "host->viewer", config);
    let downstream = Pump::new(code, "viewer->host", config);

    let finish = |report: PumpReport| async move {
        if table.teardown(code).await {
            tracing::info!(room_code = %code, by = report.direction, "Room closed");
        } else {
            tracing::debug!(room_code = %code, by = report.direction, "Room already closed");
        }
        report
    };

    tokio::join!(
        async {
            let report = upstream
                .run(host_read, viewer_write, &host.pending, room.clone())
                .await;
            finish(report).await
        },
        async {
            let report = downstream
                .run(viewer_read, host_write, &viewer.pending, room.clone())
                .await;
            finish(report).await
        },
    )
}
