use serde::Serialize;
use sha2::{Digest, Sha256};
use shared::types::Entry;

/// Only the version-bearing fields: two stores holding the same node ids at
/// the same timestamps have converged.
#[derive(Serialize)]
struct DigestView<'a> {
    node_id: &'a str,
    timestamp: i64,
    tombstone: bool,
}

/// SHA-256 over the raw snapshot, sorted by node id so input order is irrelevant.
pub fn compute_digest(entries: &[Entry]) -> String {
    let mut indices: Vec<usize> = (0..entries.len()).collect();
    indices.sort_by(|&a, &b| entries[a].node_id.cmp(&entries[b].node_id));

    let views: Vec<DigestView<'_>> = indices
        .iter()
        .map(|&i| {
            let e = &entries[i];
            DigestView {
                node_id: &e.node_id,
                timestamp: e.timestamp,
                tombstone: e.is_tombstone(),
            }
        })
        .collect();

    // Plain structs of strings, integers and bools always serialize.
    let json = serde_json::to_vec(&views).unwrap_or_default();

    hex::encode(Sha256::digest(&json))
}
