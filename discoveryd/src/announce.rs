use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use shared::protocol::{DISCOVERY_SERVICE_TYPE, PROP_HTTP};
use shared::types::{DynamicAnnouncement, DynamicServiceAnnouncement};
use crate::config::{ApiConfig, NodeConfig};
use crate::distributed::DistributedStore;

/// URI this node announces itself under
pub fn advertise_uri(config: &ApiConfig) -> Result<String> {
    if let Some(uri) = &config.advertise_uri {
        return Ok(uri.clone());
    }

    let hostname = hostname::get()
        .context("Failed to get system hostname")?
        .to_string_lossy()
        .to_string();

    let port = config
        .listen
        .rsplit(':')
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(4111);

    Ok(format!("http://{}:{}", hostname, port))
}

/// Announcement of this node's own discovery service
pub fn self_announcement(node: &NodeConfig, environment: &str, node_id: &str, uri: &str) -> DynamicAnnouncement {
    DynamicAnnouncement {
        environment: environment.to_string(),
        pool: node.pool.clone(),
        location: node.location.clone(),
        service_announcements: vec![DynamicServiceAnnouncement {
            id: Some(format!("{}-discovery", node_id)),
            service_type: Some(DISCOVERY_SERVICE_TYPE.to_string()),
            properties: Some(HashMap::from([(PROP_HTTP.to_string(), uri.to_string())])),
        }],
        max_age_in_ms: None,
    }
}

/// Keep this node announced in its own store until cancelled, then write
/// a tombstone for it so peers drop it promptly.
pub async fn run(
    store: Arc<DistributedStore>,
    node_id: String,
    announcement: DynamicAnnouncement,
    refresh: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(refresh);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = store.put_trusted(&node_id, &announcement) {
                    tracing::error!("Failed to announce self: {}", e);
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    store.delete_trusted(&node_id);
    tracing::info!("Unannounced discovery node {}", node_id);
}
