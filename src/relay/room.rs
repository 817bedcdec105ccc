use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use super::code::{CodeSource, RandomCodes};
use crate::error::{RelayError, Result};

/// Lifecycle of a room as seen by the sessions and pumps attached to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Host is waiting for a viewer
    Waiting,
    /// A viewer connection has been handed into the room
    Paired,
    /// Room was torn down; everyone attached to it must let go of their sockets
    Closed,
}

/// Why a viewer could not join a room. The display strings go on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("Room not found")]
    RoomNotFound,

    #[error("Wrong password")]
    WrongPassword,

    #[error("Room is occupied")]
    RoomOccupied,
}

/// A connection handed over to the room, with any bytes that arrived
/// right behind its handshake.
pub struct Endpoint {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub pending: Vec<u8>,
}

pub struct Room {
    pub code: String,
    password: Option<String>,
    pub host_peer: SocketAddr,
    pub created_at: Instant,
    /// Set once a viewer passes the join checks; never cleared
    viewer_reserved: bool,
    viewer: Option<Endpoint>,
    state: watch::Sender<RoomState>,
}

impl Room {
    fn new(
        code: String,
        password: Option<String>,
        host_peer: SocketAddr,
    ) -> (Self, watch::Receiver<RoomState>) {
        let (state, rx) = watch::channel(RoomState::Waiting);
        let room = Self {
            code,
            password: password.filter(|p| !p.is_empty()),
            host_peer,
            created_at: Instant::now(),
            viewer_reserved: false,
            viewer: None,
            state,
        };
        (room, rx)
    }

    pub fn has_viewer(&self) -> bool {
        self.viewer_reserved
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn state(&self) -> RoomState {
        *self.state.borrow()
    }

    fn password_matches(&self, supplied: Option<&str>) -> bool {
        match self.password.as_deref() {
            None => true,
            Some(expected) => supplied == Some(expected),
        }
    }

    /// Closes the room: wakes the host session and both pumps so they drop
    /// their sockets, and drops a viewer socket still parked in the room.
    pub fn close(self) {
        self.state.send_replace(RoomState::Closed);
    }
}

/// Live rooms keyed by code.
///
/// Every operation takes the single table lock for a short, non-blocking
/// critical section. Sockets of removed rooms are closed after the lock is
/// released.
pub struct RoomTable {
    rooms: Mutex<HashMap<String, Room>>,
    codes: Box<dyn CodeSource>,
    max_code_attempts: usize,
}

impl RoomTable {
    pub fn new(max_code_attempts: usize) -> Arc<Self> {
        Self::with_code_source(RandomCodes, max_code_attempts)
    }

    pub fn with_code_source(codes: impl CodeSource + 'static, max_code_attempts: usize) -> Arc<Self> {
        Arc::new(Self {
            rooms: Mutex::new(HashMap::new()),
            codes: Box::new(codes),
            max_code_attempts,
        })
    }

    /// Create a room under a freshly generated code.
    ///
    /// The uniqueness probe and the insert share one critical section, so two
    /// hosts can never be handed the same code.
    pub async fn create(
        &self,
        password: Option<String>,
        host_peer: SocketAddr,
    ) -> Result<(String, watch::Receiver<RoomState>)> {
        let mut rooms = self.rooms.lock().await;
        let code = self.generate(&rooms)?;

        let (room, state) = Room::new(code.clone(), password, host_peer);
        let protected = room.password.is_some();
        rooms.insert(code.clone(), room);

        tracing::info!(
            room_code = %code,
            host = %host_peer,
            protected = protected,
            "Host created room"
        );
        Ok((code, state))
    }

    fn generate(&self, rooms: &HashMap<String, Room>) -> Result<String> {
        let mut attempts = 0;
        loop {
            let candidate = self.codes.candidate();
            attempts += 1;

            if !rooms.contains_key(&candidate) {
                return Ok(candidate);
            }

            tracing::debug!(attempts = attempts, "Room code collision, retrying");
            if self.max_code_attempts > 0 && attempts >= self.max_code_attempts {
                tracing::error!(attempts = attempts, "Gave up generating a room code");
                return Err(RelayError::CodeSpaceExhausted(attempts));
            }
        }
    }

    /// Check a viewer against a room and reserve its single viewer slot.
    ///
    /// A wrong password leaves the room untouched. The password is checked
    /// before occupancy so callers without it learn nothing about the room.
    pub async fn join(&self, code: &str, password: Option<&str>) -> std::result::Result<(), JoinError> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms.get_mut(code).ok_or(JoinError::RoomNotFound)?;

        if !room.password_matches(password) {
            return Err(JoinError::WrongPassword);
        }
        if room.viewer_reserved {
            return Err(JoinError::RoomOccupied);
        }

        room.viewer_reserved = true;
        Ok(())
    }

    /// Move a joined viewer's connection into its room and wake the host.
    ///
    /// Hands the endpoint back if the room went away since `join`.
    pub async fn attach_viewer(&self, code: &str, viewer: Endpoint) -> std::result::Result<(), Endpoint> {
        let mut rooms = self.rooms.lock().await;

        match rooms.get_mut(code) {
            Some(room)
                if room.viewer_reserved
                    && room.viewer.is_none()
                    && room.state() == RoomState::Waiting =>
            {
                room.viewer = Some(viewer);
                room.state.send_replace(RoomState::Paired);
                Ok(())
            }
            _ => Err(viewer),
        }
    }

    /// Take the parked viewer connection out so the host session can relay.
    pub async fn take_viewer(&self, code: &str) -> Option<Endpoint> {
        let mut rooms = self.rooms.lock().await;
        rooms.get_mut(code).and_then(|room| room.viewer.take())
    }

    /// Atomic remove-if-present. A second caller gets `None`.
    pub async fn remove(&self, code: &str) -> Option<Room> {
        self.rooms.lock().await.remove(code)
    }

    /// Remove the room and close everything attached to it.
    ///
    /// Returns `false` when somebody else already tore it down, which is a
    /// normal outcome when both relay directions finish at once.
    pub async fn teardown(&self, code: &str) -> bool {
        match self.remove(code).await {
            Some(room) => {
                room.close();
                true
            }
            None => false,
        }
    }

    /// Remove viewer-less rooms older than `ttl`, closing their hosts.
    pub async fn expire_stale(&self, ttl: Duration) -> Vec<String> {
        let expired: Vec<Room> = {
            let mut rooms = self.rooms.lock().await;
            let codes: Vec<String> = rooms
                .values()
                .filter(|room| !room.has_viewer() && room.age() > ttl)
                .map(|room| room.code.clone())
                .collect();
            codes.iter().filter_map(|code| rooms.remove(code)).collect()
        };

        expired
            .into_iter()
            .map(|room| {
                tracing::info!(
                    room_code = %room.code,
                    host = %room.host_peer,
                    age_secs = room.age().as_secs(),
                    "Expired room without viewer"
                );
                let code = room.code.clone();
                room.close();
                code
            })
            .collect()
    }

    pub async fn contains(&self, code: &str) -> bool {
        self.rooms.lock().await.contains_key(code)
    }

    pub async fn has_viewer(&self, code: &str) -> bool {
        self.rooms
            .lock()
            .await
            .get(code)
            .map(Room::has_viewer)
            .unwrap_or(false)
    }

    pub async fn count(&self) -> usize {
        self.rooms.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::test_util::tcp_pair;
    use std::collections::{HashSet, VecDeque};

    struct ScriptedCodes(std::sync::Mutex<VecDeque<&'static str>>);

    impl ScriptedCodes {
        fn new(codes: &[&'static str]) -> Self {
            Self(std::sync::Mutex::new(codes.iter().copied().collect()))
        }
    }

    impl CodeSource for ScriptedCodes {
        fn candidate(&self) -> String {
            self.0.lock().unwrap().pop_front().unwrap_or("ZZZZZZZZ").to_string()
        }
    }

    fn host_addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_create_room() {
        let table = RoomTable::new(64);

        let (code, state) = table.create(None, host_addr()).await.unwrap();
        assert_eq!(code.len(), 8);
        assert!(table.contains(&code).await);
        assert_eq!(table.count().await, 1);
        assert_eq!(*state.borrow(), RoomState::Waiting);
    }

    #[tokio::test]
    async fn test_concurrent_creates_get_distinct_codes() {
        let table = RoomTable::new(64);

        let handles: Vec<_> = (0..200)
            .map(|_| {
                let table = Arc::clone(&table);
                tokio::spawn(async move { table.create(None, host_addr()).await.unwrap().0 })
            })
            .collect();

        let mut codes = HashSet::new();
        for handle in handles {
            codes.insert(handle.await.unwrap());
        }

        assert_eq!(codes.len(), 200);
        assert_eq!(table.count().await, 200);
    }

    #[tokio::test]
    async fn test_collision_retries_with_new_candidate() {
        let table = RoomTable::with_code_source(
            ScriptedCodes::new(&["AAAAAAAA", "AAAAAAAA", "BBBBBBBB"]),
            64,
        );

        let (first, _s1) = table.create(None, host_addr()).await.unwrap();
        let (second, _s2) = table.create(None, host_addr()).await.unwrap();

        assert_eq!(first, "AAAAAAAA");
        assert_eq!(second, "BBBBBBBB");
    }

    #[tokio::test]
    async fn test_collision_cap_fails_loudly() {
        let table = RoomTable::with_code_source(
            ScriptedCodes::new(&["AAAAAAAA", "AAAAAAAA", "AAAAAAAA"]),
            2,
        );

        let (_code, _state) = table.create(None, host_addr()).await.unwrap();
        let result = table.create(None, host_addr()).await;

        assert!(matches!(result, Err(RelayError::CodeSpaceExhausted(2))));
        assert_eq!(table.count().await, 1);
    }

    #[tokio::test]
    async fn test_code_reusable_after_remove() {
        let table = RoomTable::with_code_source(ScriptedCodes::new(&["AAAAAAAA", "AAAAAAAA"]), 1);

        let (code, _state) = table.create(None, host_addr()).await.unwrap();
        assert!(table.teardown(&code).await);

        let (again, _state) = table.create(None, host_addr()).await.unwrap();
        assert_eq!(again, code);
    }

    #[tokio::test]
    async fn test_join_without_password() {
        let table = RoomTable::new(64);
        let (code, _state) = table.create(None, host_addr()).await.unwrap();

        // A supplied password is ignored when the room has none
        assert_eq!(table.join(&code, Some("anything")).await, Ok(()));
        assert!(table.has_viewer(&code).await);
    }

    #[tokio::test]
    async fn test_empty_password_means_unprotected() {
        let table = RoomTable::new(64);
        let (code, _state) = table.create(Some(String::new()), host_addr()).await.unwrap();

        assert_eq!(table.join(&code, None).await, Ok(()));
    }

    #[tokio::test]
    async fn test_join_nonexistent_room() {
        let table = RoomTable::new(64);
        let (_code, _state) = table.create(None, host_addr()).await.unwrap();

        let result = table.join("ZZZZZZZZ", None).await;
        assert_eq!(result, Err(JoinError::RoomNotFound));
        assert_eq!(table.count().await, 1);
    }

    #[tokio::test]
    async fn test_wrong_password_leaves_room_untouched() {
        let table = RoomTable::new(64);
        let (code, state) = table
            .create(Some("secret".to_string()), host_addr())
            .await
            .unwrap();

        assert_eq!(table.join(&code, Some("wrong")).await, Err(JoinError::WrongPassword));
        assert_eq!(table.join(&code, None).await, Err(JoinError::WrongPassword));

        assert!(table.contains(&code).await);
        assert!(!table.has_viewer(&code).await);
        assert_eq!(*state.borrow(), RoomState::Waiting);

        assert_eq!(table.join(&code, Some("secret")).await, Ok(()));
    }

    #[tokio::test]
    async fn test_second_viewer_is_rejected() {
        let table = RoomTable::new(64);
        let (code, _state) = table.create(None, host_addr()).await.unwrap();

        assert_eq!(table.join(&code, None).await, Ok(()));
        assert_eq!(table.join(&code, None).await, Err(JoinError::RoomOccupied));
    }

    #[tokio::test]
    async fn test_concurrent_joins_admit_exactly_one() {
        let table = RoomTable::new(64);
        let (code, _state) = table.create(None, host_addr()).await.unwrap();

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let table = Arc::clone(&table);
                let code = code.clone();
                tokio::spawn(async move { table.join(&code, None).await })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_attach_viewer_wakes_host() {
        let table = RoomTable::new(64);
        let (code, mut state) = table.create(None, host_addr()).await.unwrap();
        let (viewer, _client) = tcp_pair().await;
        let peer = viewer.peer_addr().unwrap();

        table.join(&code, None).await.unwrap();
        let endpoint = Endpoint { stream: viewer, peer, pending: Vec::new() };
        assert!(table.attach_viewer(&code, endpoint).await.is_ok());

        state.changed().await.unwrap();
        assert_eq!(*state.borrow(), RoomState::Paired);

        let taken = table.take_viewer(&code).await.unwrap();
        assert_eq!(taken.peer, peer);
        assert!(table.take_viewer(&code).await.is_none());
    }

    #[tokio::test]
    async fn test_attach_without_join_is_refused() {
        let table = RoomTable::new(64);
        let (code, _state) = table.create(None, host_addr()).await.unwrap();
        let (viewer, _client) = tcp_pair().await;
        let peer = viewer.peer_addr().unwrap();

        let endpoint = Endpoint { stream: viewer, peer, pending: Vec::new() };
        assert!(table.attach_viewer(&code, endpoint).await.is_err());
    }

    #[tokio::test]
    async fn test_attach_after_teardown_hands_endpoint_back() {
        let table = RoomTable::new(64);
        let (code, _state) = table.create(None, host_addr()).await.unwrap();
        let (viewer, _client) = tcp_pair().await;
        let peer = viewer.peer_addr().unwrap();

        table.join(&code, None).await.unwrap();
        table.teardown(&code).await;

        let endpoint = Endpoint { stream: viewer, peer, pending: Vec::new() };
        let returned = table.attach_viewer(&code, endpoint).await.err().unwrap();
        assert_eq!(returned.peer, peer);
    }

    #[tokio::test]
    async fn test_teardown_runs_once() {
        let table = RoomTable::new(64);
        let (code, state) = table.create(None, host_addr()).await.unwrap();

        let (first, second) = tokio::join!(table.teardown(&code), table.teardown(&code));

        assert!(first ^ second);
        assert!(!table.contains(&code).await);
        assert_eq!(*state.borrow(), RoomState::Closed);
    }

    #[tokio::test]
    async fn test_teardown_closes_parked_viewer() {
        use tokio::io::AsyncReadExt;

        let table = RoomTable::new(64);
        let (code, _state) = table.create(None, host_addr()).await.unwrap();
        let (viewer, mut client) = tcp_pair().await;
        let peer = viewer.peer_addr().unwrap();

        table.join(&code, None).await.unwrap();
        let endpoint = Endpoint { stream: viewer, peer, pending: Vec::new() };
        assert!(table.attach_viewer(&code, endpoint).await.is_ok());
        assert!(table.teardown(&code).await);

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_stale_only_takes_old_viewerless_rooms() {
        let table = RoomTable::new(64);
        let (stale, stale_state) = table.create(None, host_addr()).await.unwrap();
        let (joined, _joined_state) = table.create(None, host_addr()).await.unwrap();
        table.join(&joined, None).await.unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;
        let (fresh, _fresh_state) = table.create(None, host_addr()).await.unwrap();

        let expired = table.expire_stale(Duration::from_secs(300)).await;

        assert_eq!(expired, vec![stale.clone()]);
        assert!(!table.contains(&stale).await);
        assert!(table.contains(&joined).await);
        assert!(table.contains(&fresh).await);
        assert_eq!(*stale_state.borrow(), RoomState::Closed);
    }
}
