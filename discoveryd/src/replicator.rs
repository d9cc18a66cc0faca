use std::sync::Arc;
use std::time::Duration;
use futures::future::join_all;
use discovery_client::StoreClient;
use crate::selector::{peer_uris, ServiceSelector};
use crate::store::local::LocalStore;
use crate::store::translate::PhaseTranslator;
use crate::task::TaskSlot;

/// Outcome of one anti-entropy round
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RoundSummary {
    pub peers: usize,
    pub failed: usize,
    pub merged: usize,
}

/// Pull-based anti-entropy: on a fixed delay, fetch every peer's full
/// snapshot and merge it into the local store after pool translation.
pub struct Replicator {
    node_id: String,
    local: Arc<LocalStore>,
    translator: Arc<PhaseTranslator>,
    selector: Arc<dyn ServiceSelector>,
    client: StoreClient,
    interval: Duration,
    task: TaskSlot,
}

impl Replicator {
    pub fn new(
        node_id: impl Into<String>,
        local: Arc<LocalStore>,
        translator: Arc<PhaseTranslator>,
        selector: Arc<dyn ServiceSelector>,
        client: StoreClient,
        interval: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            local,
            translator,
            selector,
            client,
            interval,
            task: TaskSlot::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Run one round synchronously, then schedule the next rounds. The next
    /// round starts `interval` after the previous one completes.
    pub async fn start(self: &Arc<Self>) {
        if self.is_running() {
            return;
        }

        let summary = self.replicate().await;
        tracing::info!(
            peers = summary.peers,
            failed = summary.failed,
            merged = summary.merged,
            "Initial replication complete"
        );

        let this = Arc::clone(self);
        self.task.start(move |cancel| async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(this.interval) => {}
                }
                this.replicate().await;
            }
            tracing::info!("Replicator stopped");
        });
    }

    pub async fn stop(&self) {
        self.task.stop().await;
    }

    /// Pull from every current peer concurrently. A failing peer is logged
    /// and skipped; the others are still merged.
    pub async fn replicate(&self) -> RoundSummary {
        let peers = peer_uris(self.selector.as_ref(), &self.node_id);

        let pulls = peers.iter().map(|peer| async move {
            match self.client.fetch_all(peer).await {
                Ok(entries) => {
                    let merged = entries
                        .into_iter()
                        .map(|entry| self.local.merge_from_peer(entry, &self.translator))
                        .filter(|changed| *changed)
                        .count();
                    tracing::debug!(peer = %peer, merged, "Replicated from peer");
                    Some(merged)
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "Replication from peer failed");
                    None
                }
            }
        });

        let results = join_all(pulls).await;
        let summary = RoundSummary {
            peers: peers.len(),
            failed: results.iter().filter(|r| r.is_none()).count(),
            merged: results.iter().flatten().sum(),
        };
        tracing::debug!(?summary, "Replication round complete");
        summary
    }
}
