use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use shared::types::now_millis;
use crate::store::local::LocalStore;

/// Periodically evict expired live entries from the local store
pub async fn run(local: Arc<LocalStore>, interval: Duration, cancel: CancellationToken) {
    let mut maintenance_interval = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = maintenance_interval.tick() => {
                let evicted = local.evict_expired(now_millis());
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = local.len(), "Evicted expired entries");
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Store maintenance shutting down");
                break;
            }
        }
    }
}
