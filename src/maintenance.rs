use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::observability;
use crate::store::ReservationStore;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Compact the WAL once `threshold` appends have piled up since the last
/// compaction. Returns whether it ran.
pub async fn compact_if_due(store: &ReservationStore, threshold: u64) -> Result<bool, EngineError> {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    match store.compact().await {
        Ok(()) => {
            metrics::counter!(observability::COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            info!(
                "compacted wal after {appends} appends ({} live reservations)",
                store.reservation_count()
            );
            Ok(true)
        }
        Err(e) => {
            metrics::counter!(observability::COMPACTIONS_TOTAL, "status" => "failed").increment(1);
            Err(e)
        }
    }
}

pub async fn run_compactor(store: Arc<ReservationStore>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&store, threshold).await {
            warn!("wal compaction failed: {e}");
        }
    }
}

/// Periodically reject pending reservations older than `ttl`. Only started
/// when an expiry window is configured.
pub async fn run_pending_expiry(engine: Arc<Engine>, ttl: chrono::Duration) {
    let mut interval = tokio::time::interval(EXPIRY_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        match engine.expire_stale_pending(ttl).await {
            Ok(expired) if expired.is_empty() => debug!("no stale pending reservations"),
            Ok(_) => {}
            Err(e) => warn!("pending expiry failed: {e}"),
        }
    }
}
