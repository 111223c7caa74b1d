// Peer table
// Remote peers keyed by id. The local session never appears in it.

use std::collections::HashMap;

use tracing::debug;

use super::messages::PeerEntry;

/// A remote peer's last known position.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub peer_id: String,
    pub display_name: String,
    pub lat: f64,
    pub lng: f64,
    pub heading_deg: Option<f64>,
    /// Local receive time of the latest sighting
    pub last_seen_ms: i64,
    /// Sender's timestamp of the stored position, if it sent one
    pub updated_at_ms: Option<i64>,
}

#[derive(Debug)]
pub struct PeerTable {
    self_id: String,
    peers: HashMap<String, PeerRecord>,
}

impl PeerTable {
    pub fn new(self_id: impl Into<String>) -> Self {
        PeerTable {
            self_id: self_id.into(),
            peers: HashMap::new(),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    /// Peers ordered by id, for stable rendering.
    pub fn sorted(&self) -> Vec<&PeerRecord> {
        let mut v: Vec<&PeerRecord> = self.peers.values().collect();
        v.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        v
    }

    /// Insert or refresh a peer. Returns false if the entry was ours.
    ///
    /// A repeat of the same entry only bumps `last_seen_ms`. An entry whose
    /// source timestamp is older than the stored one refreshes liveness but
    /// does not move the peer back.
    pub fn upsert(&mut self, entry: PeerEntry, now_ms: i64) -> bool {
        if entry.peer_id == self.self_id {
            return false;
        }

        match self.peers.get_mut(&entry.peer_id) {
            Some(rec) => {
                rec.last_seen_ms = rec.last_seen_ms.max(now_ms);
                let older = matches!(
                    (entry.updated_at_ms, rec.updated_at_ms),
                    (Some(incoming), Some(stored)) if incoming < stored
                );
                if older {
                    debug!("Out-of-order position for {} ignored", entry.peer_id);
                    return true;
                }
                rec.lat = entry.lat;
                rec.lng = entry.lng;
                rec.heading_deg = entry.heading;
                if entry.updated_at_ms.is_some() {
                    rec.updated_at_ms = entry.updated_at_ms;
                }
                if !entry.display_name.is_empty() {
                    rec.display_name = entry.display_name;
                }
            }
            None => {
                debug!("New peer {}", entry.peer_id);
                self.peers.insert(
                    entry.peer_id.clone(),
                    PeerRecord {
                        peer_id: entry.peer_id,
                        display_name: entry.display_name,
                        lat: entry.lat,
                        lng: entry.lng,
                        heading_deg: entry.heading,
                        last_seen_ms: now_ms,
                        updated_at_ms: entry.updated_at_ms,
                    },
                );
            }
        }
        true
    }

    /// Merge a full snapshot. Peers missing from it are left to the sweep.
    /// Returns how many entries were applied.
    pub fn apply_snapshot(&mut self, entries: Vec<PeerEntry>, now_ms: i64) -> usize {
        let mut applied = 0;
        for e in entries {
            if self.upsert(e, now_ms) {
                applied += 1;
            }
        }
        applied
    }

    /// Update a known peer's name. Unknown peers are not created without a position.
    pub fn rename(&mut self, peer_id: &str, display_name: &str, now_ms: i64) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(rec) => {
                rec.display_name = display_name.to_string();
                rec.last_seen_ms = rec.last_seen_ms.max(now_ms);
                true
            }
            None => false,
        }
    }

    /// Remove a peer. Removing an absent peer is a no-op.
    pub fn remove(&mut self, peer_id: &str) -> bool {
        self.peers.remove(peer_id).is_some()
    }

    /// Evict every peer not seen for more than `stale_ms`. Returns the evicted ids.
    pub fn sweep(&mut self, now_ms: i64, stale_ms: i64) -> Vec<String> {
        let mut evicted = Vec::new();
        self.peers.retain(|id, rec| {
            let keep = now_ms - rec.last_seen_ms <= stale_ms;
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });
        evicted.sort();
        evicted
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
