mod announce;
mod api;
mod auth;
mod config;
mod distributed;
mod maintenance;
mod replicator;
mod selector;
mod store;
mod task;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use discovery_client::StoreClient;
use crate::api::routes::{AppState, NodeInfo};
use crate::auth::{AllowAll, AuthManager, IpHostnameAuthManager, SystemResolver};
use crate::config::Config;
use crate::distributed::{DistributedStore, DynamicStore};
use crate::replicator::Replicator;
use crate::selector::{DiscoverySelector, ServiceSelector};
use crate::store::local::LocalStore;
use crate::store::translate::PhaseTranslator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("discoveryd=info"))
        )
        .init();

    tracing::info!("Starting discoveryd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/discovery/discoveryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let node_id = config
        .node
        .node_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::info!(
        node_id = %node_id,
        pool = %config.node.pool,
        mode = ?config.discovery.replication_mode,
        map_target = %config.discovery.map_target,
        "Node identity"
    );

    let local = Arc::new(LocalStore::new());
    let translator = Arc::new(PhaseTranslator::new(
        config.discovery.map_target.clone(),
        config.discovery.replication_mode,
    ));
    let selector: Arc<dyn ServiceSelector> = Arc::new(DiscoverySelector::new(
        local.clone(),
        translator.clone(),
        config.node.pool.clone(),
        &config.api.seeds,
    ));
    let client = StoreClient::new(config.store.remote_timeout())
        .context("Failed to create replication HTTP client")?;

    // Auth manager with its own refresh schedule
    let ip_auth = config.auth.enabled.then(|| {
        Arc::new(IpHostnameAuthManager::new(
            local.clone(),
            selector.clone(),
            Arc::new(SystemResolver),
            config.auth.update_interval(),
        ))
    });
    let auth: Arc<dyn AuthManager> = match &ip_auth {
        Some(manager) => {
            manager.start();
            manager.clone() as Arc<dyn AuthManager>
        }
        None => {
            tracing::warn!("Auth disabled; all announcements and replication are accepted");
            Arc::new(AllowAll)
        }
    };

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    let mut replicator = None;
    let mut announce_handle = None;
    let store = if config.discovery.dynamic_enabled {
        let distributed = Arc::new(DistributedStore::new(
            local.clone(),
            translator.clone(),
            auth,
            selector.clone(),
            client.clone(),
            node_id.clone(),
            config.node.environment.clone(),
            config.discovery.max_age(),
        ));

        // Keep this node discoverable by its peers
        let uri = announce::advertise_uri(&config.api)?;
        let announcement = announce::self_announcement(&config.node, &config.node.environment, &node_id, &uri);
        let refresh = (config.discovery.max_age() / 3).max(Duration::from_secs(1));
        announce_handle = Some(tokio::spawn(announce::run(
            distributed.clone(),
            node_id.clone(),
            announcement,
            refresh,
            cancel.clone(),
        )));
        tracing::info!("Announcing self as {}", uri);

        // One synchronous pass before serving so a cold node doesn't answer empty
        let r = Arc::new(Replicator::new(
            node_id.clone(),
            local.clone(),
            translator.clone(),
            selector.clone(),
            client,
            config.store.replication_interval(),
        ));
        r.start().await;
        replicator = Some(r);

        DynamicStore::Replicated(distributed)
    } else {
        tracing::info!("Dynamic announcements disabled");
        DynamicStore::Disabled
    };

    // Spawn store maintenance task
    let mgr_handle = tokio::spawn(maintenance::run(
        local.clone(),
        config.store.maintenance_interval(),
        cancel.clone(),
    ));

    // Build API router
    let app_state = AppState {
        store: Arc::new(store),
        local: local.clone(),
        node: Arc::new(NodeInfo {
            node_id: node_id.clone(),
            environment: config.node.environment.clone(),
            pool: config.node.pool.clone(),
            map_target: translator.map_target().to_string(),
            replication_mode: translator.mode(),
        }),
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Trigger cancellation
    cancel.cancel();

    if let Some(replicator) = &replicator {
        replicator.stop().await;
    }
    if let Some(manager) = &ip_auth {
        manager.stop().await;
    }

    // Wait for all tasks to complete
    if let Some(handle) = announce_handle {
        let _ = handle.await;
    }
    let _ = tokio::join!(mgr_handle, server_handle);

    tracing::info!("Shutdown complete");
    Ok(())
}
