use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::room::RoomTable;

/// Spawn the background sweep that expires viewer-less rooms.
///
/// Wakes every `every` and removes rooms older than `ttl` that never got a
/// viewer. Returns a handle so the caller can abort it on shutdown.
pub fn spawn_reaper(table: Arc<RoomTable>, every: Duration, ttl: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let expired = table.expire_stale(ttl).await;
            if !expired.is_empty() {
                let remaining = table.count().await;
                tracing::info!(
                    expired = expired.len(),
                    remaining = remaining,
                    "Reaper sweep"
                );
            }
        }
    })
}
