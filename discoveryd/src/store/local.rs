use std::collections::HashMap;
use parking_lot::{Mutex, RwLock};
use shared::types::{now_millis, Entry};
use crate::store::digest;
use crate::store::translate::PhaseTranslator;

/// In-memory entry store keyed by node id, merged last-write-wins.
///
/// Entries are never mutated in place; a write replaces the whole entry under
/// the map's write lock, so readers always observe complete entries. The
/// snapshot digest is cached and dropped by every change, then recomputed on
/// the next read.
pub struct LocalStore {
    entries: RwLock<HashMap<String, Entry>>,
    // Lock order: `entries` before `digest`
    digest: Mutex<Option<String>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            digest: Mutex::new(None),
        }
    }

    /// Upsert by node id. The incoming entry replaces the resident one only
    /// if its timestamp is strictly greater. Returns true if the store changed.
    pub fn put(&self, entry: Entry) -> bool {
        let mut entries = self.entries.write();
        match entries.get(&entry.node_id) {
            Some(existing) if entry.timestamp <= existing.timestamp => false,
            _ => {
                entries.insert(entry.node_id.clone(), entry);
                *self.digest.lock() = None;
                true
            }
        }
    }

    /// Translate an entry received from a peer, then merge it. Malformed
    /// entries are dropped.
    pub fn merge_from_peer(&self, entry: Entry, translator: &PhaseTranslator) -> bool {
        if !entry.is_well_formed() {
            tracing::warn!(node_id = %entry.node_id, "Dropping live entry without max age from peer");
            return false;
        }
        self.put(translator.translate(entry))
    }

    /// Raw lookup, tombstones and expired entries included
    pub fn get(&self, node_id: &str) -> Option<Entry> {
        self.entries.read().get(node_id).cloned()
    }

    /// Raw snapshot of everything this store knows, as served to peers
    pub fn get_all(&self) -> Vec<Entry> {
        self.entries.read().values().cloned().collect()
    }

    /// Live, unexpired entries. Each returned entry keeps only the services
    /// matching `service_type` (if given) and any of `pools` (if non-empty);
    /// entries left without services are dropped.
    pub fn get_filtered(&self, service_type: Option<&str>, pools: &[&str]) -> Vec<Entry> {
        self.get_filtered_at(now_millis(), service_type, pools)
    }

    pub fn get_filtered_at(&self, now_ms: i64, service_type: Option<&str>, pools: &[&str]) -> Vec<Entry> {
        let entries = self.entries.read();
        entries
            .values()
            .filter(|entry| !entry.is_expired(now_ms))
            .filter_map(|entry| {
                let services: Vec<_> = entry
                    .services
                    .as_ref()?
                    .iter()
                    .filter(|s| service_type.map_or(true, |t| s.service_type == t))
                    .filter(|s| pools.is_empty() || pools.contains(&s.pool.as_str()))
                    .cloned()
                    .collect();

                if services.is_empty() && (service_type.is_some() || !pools.is_empty()) {
                    return None;
                }

                Some(Entry {
                    services: Some(services),
                    ..entry.clone()
                })
            })
            .collect()
    }

    /// Drop live entries whose max age has passed. Tombstones stay so they
    /// keep overriding stale copies still held by peers.
    pub fn evict_expired(&self, now_ms: i64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now_ms));
        let removed = before - entries.len();

        if removed > 0 {
            *self.digest.lock() = None;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Digest of the raw snapshot. Computed against the same locked view it
    /// describes, so it never trails a completed write.
    pub fn digest(&self) -> String {
        let entries = self.entries.read();
        let mut cached = self.digest.lock();
        if let Some(digest) = cached.as_ref() {
            return digest.clone();
        }
        let snapshot: Vec<Entry> = entries.values().cloned().collect();
        let digest = digest::compute_digest(&snapshot);
        *cached = Some(digest.clone());
        digest
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}
