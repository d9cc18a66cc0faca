use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use shared::protocol::{DISCOVERY_SERVICE_TYPE, PROP_HTTP};
use shared::types::Service;
use crate::store::local::LocalStore;
use crate::store::translate::PhaseTranslator;

/// Source of discovery-node descriptors in this node's pool.
pub trait ServiceSelector: Send + Sync {
    fn select_all_services(&self) -> Vec<Service>;
}

/// Discovery nodes known from configured seeds plus those announced into
/// the local store.
pub struct DiscoverySelector {
    store: Arc<LocalStore>,
    translator: Arc<PhaseTranslator>,
    pool: String,
    seeds: Vec<Service>,
}

impl DiscoverySelector {
    pub fn new(
        store: Arc<LocalStore>,
        translator: Arc<PhaseTranslator>,
        pool: impl Into<String>,
        seed_uris: &[String],
    ) -> Self {
        let pool = pool.into();
        let seeds = seed_uris
            .iter()
            .map(|uri| Service {
                id: format!("seed:{}", uri),
                node_id: String::new(),
                service_type: DISCOVERY_SERVICE_TYPE.to_string(),
                pool: pool.clone(),
                location: String::new(),
                properties: HashMap::from([(PROP_HTTP.to_string(), uri.clone())]),
            })
            .collect();

        Self {
            store,
            translator,
            pool,
            seeds,
        }
    }
}

impl ServiceSelector for DiscoverySelector {
    fn select_all_services(&self) -> Vec<Service> {
        let pools = self.translator.pool_aliases(&self.pool);
        let announced = self
            .store
            .get_filtered(Some(DISCOVERY_SERVICE_TYPE), &pools)
            .into_iter()
            .filter_map(|entry| entry.services)
            .flatten();

        self.seeds.iter().cloned().chain(announced).collect()
    }
}

/// Distinct `http` URIs of the selected discovery nodes, excluding `own_node_id`
pub fn peer_uris(selector: &dyn ServiceSelector, own_node_id: &str) -> Vec<String> {
    selector
        .select_all_services()
        .into_iter()
        .filter(|s| s.node_id != own_node_id)
        .filter_map(|s| s.properties.get(PROP_HTTP).cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
