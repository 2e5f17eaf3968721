use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::room::registry::RoomRegistry;

/// Periodic empty-room reaper. Per-session grace timers and host
/// reassignment deadlines live on the rooms themselves; this task only
/// sweeps rooms whose TTL clock ran out.
pub fn spawn_reaper(registry: Arc<RoomRegistry>, interval_ms: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(100)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            registry.reap_empty().await;
        }
    })
}

/// Graceful-shutdown sequence: stop admitting, warn every channel, and give
/// in-flight writes a moment to flush.
pub async fn drain(registry: &Arc<RoomRegistry>) {
    registry.set_draining(true);
    registry.notify_restarting().await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    info!(rooms = registry.room_count(), "drain complete");
}
