//! Shared fixtures for in-process cluster tests.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use discovery_client::StoreClient;
use shared::protocol::{DISCOVERY_SERVICE_TYPE, PROP_HTTP};
use shared::types::{DynamicAnnouncement, DynamicServiceAnnouncement, Entry, Service};
use crate::api::routes::{self, AppState, NodeInfo};
use crate::auth::{AllowAll, AuthManager, IpHostnameAuthManager, Resolver};
use crate::distributed::{DistributedStore, DynamicStore};
use crate::replicator::Replicator;
use crate::selector::ServiceSelector;
use crate::store::local::LocalStore;
use crate::store::translate::{PhaseTranslator, ReplicationMode};

pub const ENVIRONMENT: &str = "testing";

pub fn service(id: &str, node_id: &str, service_type: &str, pool: &str) -> Service {
    Service {
        id: id.to_string(),
        node_id: node_id.to_string(),
        service_type: service_type.to_string(),
        pool: pool.to_string(),
        location: "/test-location".to_string(),
        properties: HashMap::from([("key".to_string(), "value".to_string())]),
    }
}

pub fn discovery_service(node_id: &str, pool: &str, uri: &str) -> Service {
    Service {
        id: format!("{}-discovery", node_id),
        node_id: node_id.to_string(),
        service_type: DISCOVERY_SERVICE_TYPE.to_string(),
        pool: pool.to_string(),
        location: "/".to_string(),
        properties: HashMap::from([(PROP_HTTP.to_string(), uri.to_string())]),
    }
}

pub fn discovery_entry(node_id: &str, pool: &str, uri: &str, timestamp: i64) -> Entry {
    Entry::live(node_id, vec![discovery_service(node_id, pool, uri)], timestamp, 60_000, None)
}

/// Announcement of a single `storage` service without contact properties
pub fn announcement(pool: &str) -> DynamicAnnouncement {
    DynamicAnnouncement {
        environment: ENVIRONMENT.to_string(),
        pool: pool.to_string(),
        location: "/test-location".to_string(),
        service_announcements: vec![DynamicServiceAnnouncement {
            id: Some("svc-1".to_string()),
            service_type: Some("storage".to_string()),
            properties: Some(HashMap::from([("key".to_string(), "value".to_string())])),
        }],
        max_age_in_ms: None,
    }
}

/// Selector whose result set the test controls
#[derive(Default)]
pub struct StaticSelector {
    services: RwLock<Vec<Service>>,
}

impl StaticSelector {
    pub fn set(&self, services: Vec<Service>) {
        *self.services.write() = services;
    }
}

impl ServiceSelector for StaticSelector {
    fn select_all_services(&self) -> Vec<Service> {
        self.services.read().clone()
    }
}

/// Resolver answering from a fixed table; unknown names fail
pub struct StaticResolver {
    table: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new(entries: &[(&str, &[&str])]) -> Self {
        let table = entries
            .iter()
            .map(|(host, addrs)| {
                let addrs = addrs.iter().map(|a| a.parse().unwrap()).collect();
                (host.to_string(), addrs)
            })
            .collect();
        Self { table }
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        self.table
            .get(host)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown host {}", host)))
    }
}

/// Formatted log output collected in memory while installed as the
/// thread's default subscriber
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Captured lines emitted on `target`
    pub fn lines_for(&self, target: &str) -> Vec<String> {
        let prefix = format!(" {}:", target);
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .filter(|line| line.contains(&prefix))
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A discovery node serving the full router on an ephemeral localhost port.
/// The server shuts down when the node is dropped.
pub struct TestNode {
    pub node_id: String,
    pub uri: String,
    pub local: Arc<LocalStore>,
    pub translator: Arc<PhaseTranslator>,
    cancel: CancellationToken,
}

impl TestNode {
    /// Node that trusts every replication peer
    pub async fn spawn(map_target: &str, mode: ReplicationMode) -> Self {
        Self::spawn_with(map_target, mode, |_| Arc::new(AllowAll), true).await
    }

    /// Node whose trusted peer set is empty, so all replication traffic is refused
    pub async fn spawn_untrusting(map_target: &str, mode: ReplicationMode) -> Self {
        Self::spawn_with(
            map_target,
            mode,
            |local| {
                Arc::new(IpHostnameAuthManager::new(
                    local,
                    Arc::new(StaticSelector::default()),
                    Arc::new(StaticResolver::new(&[])),
                    Duration::from_secs(60),
                ))
            },
            true,
        )
        .await
    }

    /// Node with dynamic announcements turned off
    pub async fn spawn_disabled() -> Self {
        Self::spawn_with("general", ReplicationMode::PhaseOne, |_| Arc::new(AllowAll), false).await
    }

    async fn spawn_with<F>(map_target: &str, mode: ReplicationMode, make_auth: F, enabled: bool) -> Self
    where
        F: FnOnce(Arc<LocalStore>) -> Arc<dyn AuthManager>,
    {
        let node_id = uuid::Uuid::new_v4().to_string();
        let local = Arc::new(LocalStore::new());
        let translator = Arc::new(PhaseTranslator::new(map_target, mode));

        let store = if enabled {
            DynamicStore::Replicated(Arc::new(DistributedStore::new(
                local.clone(),
                translator.clone(),
                make_auth(local.clone()),
                Arc::new(StaticSelector::default()),
                StoreClient::new(Duration::from_secs(2)).unwrap(),
                node_id.clone(),
                ENVIRONMENT,
                Duration::from_secs(90),
            )))
        } else {
            DynamicStore::Disabled
        };

        let state = AppState {
            store: Arc::new(store),
            local: local.clone(),
            node: Arc::new(NodeInfo {
                node_id: node_id.clone(),
                environment: ENVIRONMENT.to_string(),
                pool: "general".to_string(),
                map_target: map_target.to_string(),
                replication_mode: mode,
            }),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server_cancel = cancel.clone();
        let app = routes::router(state);

        tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move { server_cancel.cancelled().await })
                .await;
        });

        Self {
            node_id,
            uri: format!("http://{}", addr),
            local,
            translator,
            cancel,
        }
    }

    /// How other nodes' selectors see this node
    pub fn descriptor(&self) -> Service {
        discovery_service(&self.node_id, "general", &self.uri)
    }

    /// Replicator that pulls from `peers` into this node's store
    pub fn replicator_from(&self, peers: &[&TestNode]) -> Replicator {
        let selector = StaticSelector::default();
        selector.set(peers.iter().map(|p| p.descriptor()).collect());
        Replicator::new(
            self.node_id.clone(),
            self.local.clone(),
            self.translator.clone(),
            Arc::new(selector),
            StoreClient::new(Duration::from_secs(2)).unwrap(),
            Duration::from_secs(60),
        )
    }

    /// Poll the local store until `node_id` shows up
    pub async fn wait_for(&self, node_id: &str) -> Option<Entry> {
        for _ in 0..100 {
            if let Some(entry) = self.local.get(node_id) {
                return Some(entry);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
