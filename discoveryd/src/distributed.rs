use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use discovery_client::StoreClient;
use shared::types::{now_millis, DynamicAnnouncement, Entry, Service};
use crate::auth::{AuthError, AuthManager};
use crate::selector::{peer_uris, ServiceSelector};
use crate::store::local::LocalStore;
use crate::store::translate::PhaseTranslator;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Forbidden(#[from] AuthError),

    #[error("dynamic announcements are disabled")]
    Disabled,

    #[error("invalid announcement: {0}")]
    Validation(String),
}

/// Dynamic announcement store as seen by the API: replicated across the
/// cluster, or a stand-in that refuses writes when dynamic announcements
/// are turned off.
pub enum DynamicStore {
    Replicated(Arc<DistributedStore>),
    Disabled,
}

impl DynamicStore {
    pub async fn put(
        &self,
        node_id: &str,
        announcement: &DynamicAnnouncement,
        requester: IpAddr,
    ) -> Result<(), StoreError> {
        match self {
            Self::Replicated(store) => store.put(node_id, announcement, requester).await,
            Self::Disabled => Err(StoreError::Disabled),
        }
    }

    pub async fn delete(&self, node_id: &str, requester: IpAddr) -> Result<(), StoreError> {
        match self {
            Self::Replicated(store) => store.delete(node_id, requester).await,
            Self::Disabled => Err(StoreError::Disabled),
        }
    }

    pub fn get_all(&self) -> Vec<Service> {
        self.query(None, None)
    }

    pub fn get(&self, service_type: &str) -> Vec<Service> {
        self.query(Some(service_type), None)
    }

    pub fn get_in_pool(&self, service_type: &str, pool: &str) -> Vec<Service> {
        self.query(Some(service_type), Some(pool))
    }

    fn query(&self, service_type: Option<&str>, pool: Option<&str>) -> Vec<Service> {
        match self {
            Self::Replicated(store) => store.query(service_type, pool),
            Self::Disabled => Vec::new(),
        }
    }

    /// Raw snapshot for a peer's pull
    pub fn snapshot(&self, requester: IpAddr) -> Result<Vec<Entry>, StoreError> {
        match self {
            Self::Replicated(store) => store.snapshot(requester),
            Self::Disabled => Err(StoreError::Disabled),
        }
    }

    /// Merge an entry pushed by a peer
    pub fn accept_replicated(&self, entry: Entry, requester: IpAddr) -> Result<bool, StoreError> {
        match self {
            Self::Replicated(store) => store.accept_replicated(entry, requester),
            Self::Disabled => Err(StoreError::Disabled),
        }
    }
}

/// Local writes plus best-effort push of each write to every known peer.
/// Pull replication delivers the same state if a push is lost.
pub struct DistributedStore {
    local: Arc<LocalStore>,
    translator: Arc<PhaseTranslator>,
    auth: Arc<dyn AuthManager>,
    selector: Arc<dyn ServiceSelector>,
    client: StoreClient,
    node_id: String,
    environment: String,
    default_max_age: Duration,
}

impl DistributedStore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local: Arc<LocalStore>,
        translator: Arc<PhaseTranslator>,
        auth: Arc<dyn AuthManager>,
        selector: Arc<dyn ServiceSelector>,
        client: StoreClient,
        node_id: impl Into<String>,
        environment: impl Into<String>,
        default_max_age: Duration,
    ) -> Self {
        Self {
            local,
            translator,
            auth,
            selector,
            client,
            node_id: node_id.into(),
            environment: environment.into(),
            default_max_age,
        }
    }

    pub async fn put(
        &self,
        node_id: &str,
        announcement: &DynamicAnnouncement,
        requester: IpAddr,
    ) -> Result<(), StoreError> {
        self.validate(announcement)?;
        self.auth.check_auth_announce(node_id, announcement, requester).await?;

        let entry = self.build_entry(node_id, announcement, Some(requester.to_canonical().to_string()));
        tracing::debug!(node_id = %node_id, ip = %requester, "Accepted announcement");
        self.write(entry);
        Ok(())
    }

    pub async fn delete(&self, node_id: &str, requester: IpAddr) -> Result<(), StoreError> {
        self.auth.check_auth_delete(node_id, requester).await?;

        tracing::debug!(node_id = %node_id, ip = %requester, "Accepted delete");
        self.write(Entry::tombstone(node_id, self.next_timestamp(node_id), None));
        Ok(())
    }

    /// Announce on behalf of this node itself, bypassing auth
    pub fn put_trusted(&self, node_id: &str, announcement: &DynamicAnnouncement) -> Result<(), StoreError> {
        self.validate(announcement)?;
        self.write(self.build_entry(node_id, announcement, None));
        Ok(())
    }

    /// Delete on behalf of this node itself, bypassing auth
    pub fn delete_trusted(&self, node_id: &str) {
        self.write(Entry::tombstone(node_id, self.next_timestamp(node_id), None));
    }

    pub fn query(&self, service_type: Option<&str>, pool: Option<&str>) -> Vec<Service> {
        let pools = pool.map(|p| self.translator.pool_aliases(p)).unwrap_or_default();
        self.local
            .get_filtered(service_type, &pools)
            .into_iter()
            .filter_map(|entry| entry.services)
            .flatten()
            .collect()
    }

    pub fn snapshot(&self, requester: IpAddr) -> Result<Vec<Entry>, StoreError> {
        self.auth.check_auth_replicate(requester)?;
        Ok(self.local.get_all())
    }

    pub fn accept_replicated(&self, entry: Entry, requester: IpAddr) -> Result<bool, StoreError> {
        self.auth.check_auth_replicate(requester)?;
        Ok(self.local.merge_from_peer(entry, &self.translator))
    }

    fn validate(&self, announcement: &DynamicAnnouncement) -> Result<(), StoreError> {
        announcement.validate().map_err(StoreError::Validation)?;
        if announcement.environment != self.environment {
            return Err(StoreError::Validation(format!(
                "environment {} does not match {}",
                announcement.environment, self.environment
            )));
        }
        Ok(())
    }

    fn build_entry(&self, node_id: &str, announcement: &DynamicAnnouncement, announcer: Option<String>) -> Entry {
        let max_age = announcement
            .max_age_in_ms
            .unwrap_or(self.default_max_age.as_millis() as i64);
        Entry::live(
            node_id,
            announcement.to_services(node_id),
            self.next_timestamp(node_id),
            max_age,
            announcer,
        )
    }

    /// Wall-clock now, bumped past the resident version so a local write
    /// always supersedes it even within the same millisecond.
    fn next_timestamp(&self, node_id: &str) -> i64 {
        let now = now_millis();
        match self.local.get(node_id) {
            Some(existing) if existing.timestamp >= now => existing.timestamp.saturating_add(1),
            _ => now,
        }
    }

    fn write(&self, entry: Entry) {
        if !self.local.put(entry.clone()) {
            tracing::debug!(
                node_id = %entry.node_id,
                timestamp = entry.timestamp,
                "Local write superseded by a concurrent newer entry"
            );
        }
        self.push(entry);
    }

    fn push(&self, entry: Entry) {
        for peer in peer_uris(self.selector.as_ref(), &self.node_id) {
            let client = self.client.clone();
            let entry = entry.clone();
            tokio::spawn(async move {
                if let Err(e) = client.push(&peer, &entry).await {
                    tracing::warn!(peer = %peer, node_id = %entry.node_id, error = %e, "Failed to push entry");
                }
            });
        }
    }
}
