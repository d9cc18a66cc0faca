use serde::{Deserialize, Serialize};
use shared::protocol::GENERAL_POOL;
use shared::types::Entry;

/// Stage of the fleet-wide rename of the `general` pool to a per-datacenter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Stores the general pool as `general`
    #[default]
    PhaseOne,
    /// Stores whatever spelling arrives
    PhaseTwo,
    /// Stores the general pool as the map target
    PhaseThree,
}

/// Rewrites pool names of entries consumed from peers, according to this
/// node's own mode and map target.
#[derive(Debug, Clone)]
pub struct PhaseTranslator {
    map_target: String,
    mode: ReplicationMode,
}

impl PhaseTranslator {
    pub fn new(map_target: impl Into<String>, mode: ReplicationMode) -> Self {
        Self {
            map_target: map_target.into(),
            mode,
        }
    }

    pub fn mode(&self) -> ReplicationMode {
        self.mode
    }

    pub fn map_target(&self) -> &str {
        &self.map_target
    }

    pub fn translate(&self, mut entry: Entry) -> Entry {
        if let Some(services) = entry.services.as_mut() {
            for service in services.iter_mut() {
                if let Some(pool) = self.translate_pool(&service.pool) {
                    service.pool = pool;
                }
            }
        }
        entry
    }

    /// New spelling for `pool`, or `None` to keep it as is
    fn translate_pool(&self, pool: &str) -> Option<String> {
        match self.mode {
            ReplicationMode::PhaseOne if pool == self.map_target => Some(GENERAL_POOL.to_string()),
            ReplicationMode::PhaseThree if pool == GENERAL_POOL => Some(self.map_target.clone()),
            _ => None,
        }
    }

    /// Pool spellings a query for `pool` should match. Both spellings of the
    /// general pool can be resident mid-migration.
    pub fn pool_aliases<'a>(&'a self, pool: &'a str) -> Vec<&'a str> {
        if pool != self.map_target && pool != GENERAL_POOL {
            return vec![pool];
        }
        if self.map_target == GENERAL_POOL {
            return vec![GENERAL_POOL];
        }
        vec![GENERAL_POOL, self.map_target.as_str()]
    }
}
