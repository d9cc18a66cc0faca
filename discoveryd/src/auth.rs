use std::collections::HashSet;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::watch;
use shared::protocol::{CONTACT_PROPERTIES, PROP_HTTP};
use shared::types::DynamicAnnouncement;
use crate::selector::ServiceSelector;
use crate::store::local::LocalStore;
use crate::task::TaskSlot;

const AUDIT_TARGET: &str = "discoveryd::audit";

/// Request refused by the auth manager. Always surfaces as Forbidden.
#[derive(Debug, Error)]
#[error("forbidden: {0}")]
pub struct AuthError(pub String);

/// Hostname to address resolution, swappable for tests.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip.to_canonical()]);
        }
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip().to_canonical()).collect())
    }
}

/// Guards writes, deletes and replication traffic.
#[async_trait]
pub trait AuthManager: Send + Sync {
    async fn check_auth_announce(
        &self,
        node_id: &str,
        announcement: &DynamicAnnouncement,
        requester: IpAddr,
    ) -> Result<(), AuthError>;

    async fn check_auth_delete(&self, node_id: &str, requester: IpAddr) -> Result<(), AuthError>;

    fn check_auth_replicate(&self, requester: IpAddr) -> Result<(), AuthError>;
}

/// Used when auth is disabled in config
pub struct AllowAll;

#[async_trait]
impl AuthManager for AllowAll {
    async fn check_auth_announce(&self, _: &str, _: &DynamicAnnouncement, _: IpAddr) -> Result<(), AuthError> {
        Ok(())
    }

    async fn check_auth_delete(&self, _: &str, _: IpAddr) -> Result<(), AuthError> {
        Ok(())
    }

    fn check_auth_replicate(&self, _: IpAddr) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Enforces node-id ownership by announcing IP, checks that announced
/// contact hosts resolve to the announcer, and admits replication only from
/// addresses of known discovery nodes.
///
/// The trusted address set is rebuilt on a fixed delay and swapped in whole.
pub struct IpHostnameAuthManager {
    store: Arc<LocalStore>,
    selector: Arc<dyn ServiceSelector>,
    resolver: Arc<dyn Resolver>,
    update_interval: Duration,
    trusted: watch::Sender<Arc<HashSet<IpAddr>>>,
    refresh_task: TaskSlot,
}

impl IpHostnameAuthManager {
    pub fn new(
        store: Arc<LocalStore>,
        selector: Arc<dyn ServiceSelector>,
        resolver: Arc<dyn Resolver>,
        update_interval: Duration,
    ) -> Self {
        let (trusted, _) = watch::channel(Arc::new(HashSet::new()));
        Self {
            store,
            selector,
            resolver,
            update_interval,
            trusted,
            refresh_task: TaskSlot::default(),
        }
    }

    /// Start the periodic trusted-set refresh; the first refresh runs immediately
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.refresh_task.start(move |cancel| async move {
            loop {
                this.refresh().await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(this.update_interval) => {}
                }
            }
            tracing::info!("Discovery address refresh stopped");
        });
    }

    pub async fn stop(&self) {
        self.refresh_task.stop().await;
    }

    /// Resolve every known discovery node's `http` host. Hosts that fail to
    /// resolve are left out of the new set.
    pub async fn refresh(&self) {
        let hosts: Vec<String> = self
            .selector
            .select_all_services()
            .iter()
            .filter_map(|s| s.properties.get(PROP_HTTP))
            .filter_map(|uri| uri_host(uri))
            .collect();

        let lookups = hosts.iter().map(|host| async move {
            match self.resolver.resolve(host).await {
                Ok(addrs) => addrs,
                Err(e) => {
                    tracing::warn!(host = %host, error = %e, "Failed to resolve discovery host");
                    Vec::new()
                }
            }
        });

        let addrs: HashSet<IpAddr> = join_all(lookups).await.into_iter().flatten().collect();
        tracing::debug!(count = addrs.len(), "Refreshed trusted discovery addresses");
        self.trusted.send_replace(Arc::new(addrs));
    }

    pub fn trusted_addrs(&self) -> Arc<HashSet<IpAddr>> {
        self.trusted.borrow().clone()
    }

    async fn check_owner(&self, node_id: &str, requester: IpAddr, action: &str) -> Result<(), AuthError> {
        let Some(announcer) = self.store.get(node_id).and_then(|e| e.announcer) else {
            return Ok(());
        };

        let owners = self
            .resolver
            .resolve(&announcer)
            .await
            .map_err(|e| deny(requester, Some(node_id), format!("cannot resolve announcer {}: {}", announcer, e)))?;

        if !owners.contains(&requester) {
            return Err(deny(
                requester,
                Some(node_id),
                format!("IP {} tried to {} node {} owned by IP {}", requester, action, node_id, announcer),
            ));
        }
        Ok(())
    }

    async fn check_contact_host(&self, node_id: &str, uri: &str, requester: IpAddr) -> Result<(), AuthError> {
        let host = uri_host(uri)
            .ok_or_else(|| deny(requester, Some(node_id), format!("unparseable contact URI {}", uri)))?;

        let addrs = self
            .resolver
            .resolve(&host)
            .await
            .map_err(|e| deny(requester, Some(node_id), format!("cannot resolve {}: {}", host, e)))?;

        if !addrs.contains(&requester) {
            return Err(deny(
                requester,
                Some(node_id),
                format!("IP {} tried to announce other host {}", requester, host),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthManager for IpHostnameAuthManager {
    async fn check_auth_announce(
        &self,
        node_id: &str,
        announcement: &DynamicAnnouncement,
        requester: IpAddr,
    ) -> Result<(), AuthError> {
        let requester = requester.to_canonical();
        self.check_owner(node_id, requester, "re-announce").await?;

        for service in &announcement.service_announcements {
            let Some(properties) = &service.properties else { continue };
            for key in CONTACT_PROPERTIES {
                if let Some(uri) = properties.get(key) {
                    self.check_contact_host(node_id, uri, requester).await?;
                }
            }
        }
        Ok(())
    }

    async fn check_auth_delete(&self, node_id: &str, requester: IpAddr) -> Result<(), AuthError> {
        self.check_owner(node_id, requester.to_canonical(), "delete").await
    }

    fn check_auth_replicate(&self, requester: IpAddr) -> Result<(), AuthError> {
        let requester = requester.to_canonical();
        if !self.trusted.borrow().contains(&requester) {
            return Err(deny(
                requester,
                None,
                format!("IP {} tried to replicate as discovery", requester),
            ));
        }
        Ok(())
    }
}

/// Audit-log a refusal and build the error for it
fn deny(requester: IpAddr, node_id: Option<&str>, reason: String) -> AuthError {
    tracing::warn!(
        target: AUDIT_TARGET,
        ip = %requester,
        node_id = node_id.unwrap_or("-"),
        reason = %reason,
        "Request forbidden"
    );
    AuthError(reason)
}

/// Host part of a URI, without IPv6 brackets
fn uri_host(uri: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(uri).ok()?;
    let host = parsed.host_str()?;
    Some(host.trim_start_matches('[').trim_end_matches(']').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use shared::types::{DynamicServiceAnnouncement, Entry};
    use crate::testing::{announcement, discovery_service, LogCapture, StaticResolver, StaticSelector};

    const OWNER: &str = "10.0.0.1";
    const OTHER: &str = "10.0.0.2";

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn manager(store: Arc<LocalStore>, selector: Arc<StaticSelector>) -> IpHostnameAuthManager {
        let resolver = StaticResolver::new(&[
            ("owner.example", &[OWNER]),
            ("other.example", &[OTHER]),
            ("peer.example", &[OTHER, "10.0.0.3"]),
        ]);
        IpHostnameAuthManager::new(store, selector, Arc::new(resolver), Duration::from_millis(50))
    }

    fn with_contact(key: &str, uri: &str) -> DynamicAnnouncement {
        let mut a = announcement("general");
        a.service_announcements = vec![DynamicServiceAnnouncement {
            id: Some("svc".to_string()),
            service_type: Some("web".to_string()),
            properties: Some(HashMap::from([(key.to_string(), uri.to_string())])),
        }];
        a
    }

    #[tokio::test]
    async fn test_unowned_node_may_be_announced() {
        let auth = manager(Arc::new(LocalStore::new()), Arc::new(StaticSelector::default()));
        assert!(auth.check_auth_announce("n1", &announcement("general"), ip(OTHER)).await.is_ok());
    }

    #[tokio::test]
    async fn test_ownership_enforced_for_announce_and_delete() {
        let store = Arc::new(LocalStore::new());
        store.put(Entry::live("n1", vec![], 1_000, 30_000, Some(OWNER.to_string())));
        let auth = manager(store, Arc::new(StaticSelector::default()));

        assert!(auth.check_auth_announce("n1", &announcement("general"), ip(OWNER)).await.is_ok());
        assert!(auth.check_auth_announce("n1", &announcement("general"), ip(OTHER)).await.is_err());
        assert!(auth.check_auth_delete("n1", ip(OWNER)).await.is_ok());
        assert!(auth.check_auth_delete("n1", ip(OTHER)).await.is_err());
    }

    #[tokio::test]
    async fn test_refusals_are_audit_logged() {
        let logs = LogCapture::default();
        let _guard = logs.install();

        let store = Arc::new(LocalStore::new());
        store.put(Entry::live("n1", vec![], 1_000, 30_000, Some(OWNER.to_string())));
        let auth = manager(store, Arc::new(StaticSelector::default()));

        assert!(auth.check_auth_delete("n1", ip(OWNER)).await.is_ok());
        assert!(logs.lines_for(AUDIT_TARGET).is_empty(), "Allowed requests are not audited");

        assert!(auth.check_auth_delete("n1", ip(OTHER)).await.is_err());
        assert!(auth.check_auth_replicate(ip(OTHER)).is_err());

        let audit = logs.lines_for(AUDIT_TARGET);
        assert_eq!(audit.len(), 2, "{:?}", audit);

        let ownership = &audit[0];
        assert!(ownership.contains("WARN"));
        assert!(ownership.contains("ip=10.0.0.2"));
        assert!(ownership.contains("node_id") && ownership.contains("n1"));
        assert!(ownership.contains("tried to delete node n1 owned by IP 10.0.0.1"));

        let replicate = &audit[1];
        assert!(replicate.contains("ip=10.0.0.2"));
        assert!(replicate.contains("node_id") && replicate.contains("-"));
        assert!(replicate.contains("tried to replicate as discovery"));
    }

    #[tokio::test]
    async fn test_ipv4_mapped_requester_matches_owner() {
        let store = Arc::new(LocalStore::new());
        store.put(Entry::live("n1", vec![], 1_000, 30_000, Some(OWNER.to_string())));
        let auth = manager(store, Arc::new(StaticSelector::default()));

        let mapped: IpAddr = "::ffff:10.0.0.1".parse().unwrap();
        assert!(auth.check_auth_delete("n1", mapped).await.is_ok());
    }

    #[tokio::test]
    async fn test_tombstone_without_announcer_frees_identity() {
        let store = Arc::new(LocalStore::new());
        store.put(Entry::tombstone("n1", 1_000, None));
        let auth = manager(store, Arc::new(StaticSelector::default()));
        assert!(auth.check_auth_announce("n1", &announcement("general"), ip(OTHER)).await.is_ok());
    }

    #[tokio::test]
    async fn test_contact_host_must_resolve_to_requester() {
        let auth = manager(Arc::new(LocalStore::new()), Arc::new(StaticSelector::default()));

        for key in ["http", "https", "admin"] {
            let own = with_contact(key, "http://owner.example:8080/path");
            assert!(auth.check_auth_announce("n1", &own, ip(OWNER)).await.is_ok(), "{}", key);

            let foreign = with_contact(key, "http://other.example:8080");
            assert!(auth.check_auth_announce("n1", &foreign, ip(OWNER)).await.is_err(), "{}", key);
        }

        let literal = with_contact("http", "http://10.0.0.1:8080");
        assert!(auth.check_auth_announce("n1", &literal, ip(OWNER)).await.is_ok());

        let unrelated = with_contact("jdbc", "http://other.example");
        assert!(auth.check_auth_announce("n1", &unrelated, ip(OWNER)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unresolvable_contact_host_is_forbidden() {
        let auth = manager(Arc::new(LocalStore::new()), Arc::new(StaticSelector::default()));
        let a = with_contact("https", "https://nowhere.example");
        assert!(auth.check_auth_announce("n1", &a, ip(OWNER)).await.is_err());

        let garbage = with_contact("http", "not a uri");
        assert!(auth.check_auth_announce("n1", &garbage, ip(OWNER)).await.is_err());
    }

    #[tokio::test]
    async fn test_replicate_requires_trusted_peer() {
        let selector = Arc::new(StaticSelector::default());
        selector.set(vec![
            discovery_service("d1", "general", "http://peer.example:4111"),
            discovery_service("d2", "general", "http://nowhere.example:4111"),
        ]);
        let auth = manager(Arc::new(LocalStore::new()), selector.clone());

        assert!(auth.check_auth_replicate(ip(OTHER)).is_err(), "Nothing trusted before refresh");

        auth.refresh().await;
        assert!(auth.check_auth_replicate(ip(OTHER)).is_ok());
        assert!(auth.check_auth_replicate(ip("10.0.0.3")).is_ok());
        assert!(auth.check_auth_replicate(ip(OWNER)).is_err());
        assert_eq!(auth.trusted_addrs().len(), 2);

        selector.set(vec![]);
        auth.refresh().await;
        assert!(auth.check_auth_replicate(ip(OTHER)).is_err(), "Removed peers lose trust");
    }

    #[tokio::test]
    async fn test_background_refresh_runs_immediately() {
        let selector = Arc::new(StaticSelector::default());
        selector.set(vec![discovery_service("d1", "general", "http://other.example")]);
        let auth = Arc::new(manager(Arc::new(LocalStore::new()), selector));

        auth.start();
        let mut ready = false;
        for _ in 0..50 {
            if auth.check_auth_replicate(ip(OTHER)).is_ok() {
                ready = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        auth.stop().await;
        auth.stop().await;
        assert!(ready);
    }

    #[test]
    fn test_uri_host() {
        assert_eq!(uri_host("http://host.example:80/x").as_deref(), Some("host.example"));
        assert_eq!(uri_host("https://[::1]:8443").as_deref(), Some("::1"));
        assert_eq!(uri_host("garbage"), None);
    }
}
