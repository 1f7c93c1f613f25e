use std::collections::{HashMap, HashSet};

use meshcall_protocol::{PeerId, RoomId};
use tokio::sync::RwLock;

#[derive(Default)]
struct Registry {
    /// Map from room ID to the set of participants currently joined
    rooms: HashMap<RoomId, HashSet<PeerId>>,
    /// Map from participant ID to the rooms it belongs to. A participant may
    /// hold multiple independent memberships over one connection.
    memberships: HashMap<PeerId, HashSet<RoomId>>,
}

/// Process-wide room registry, owned by the relay's application state.
///
/// Every mutation and every snapshot runs inside one write section, so a
/// join can never interleave with a concurrent disconnect and hand an
/// inconsistent member list to a new joiner.
pub struct RoomRegistry {
    inner: RwLock<Registry>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Registry::default()),
        }
    }

    /// Add `peer` to `room`, creating the room if absent. Returns the members
    /// present before the join: the snapshot owed to the requester, which
    /// excludes the requester itself.
    pub async fn join(&self, peer: PeerId, room: RoomId) -> Vec<PeerId> {
        let mut registry = self.inner.write().await;

        let members = registry.rooms.entry(room.clone()).or_default();
        let snapshot: Vec<PeerId> = members.iter().filter(|m| **m != peer).cloned().collect();
        members.insert(peer.clone());

        registry.memberships.entry(peer).or_default().insert(room);

        snapshot
    }

    /// Remove `peer` from every room it belongs to, dropping rooms that
    /// become empty. Returns, per departed room, the members that remain:
    /// the scope of the peer-left broadcast.
    pub async fn disconnect(&self, peer: &PeerId) -> Vec<(RoomId, Vec<PeerId>)> {
        let mut registry = self.inner.write().await;

        let Some(rooms) = registry.memberships.remove(peer) else {
            return Vec::new();
        };

        let mut departed = Vec::with_capacity(rooms.len());
        for room in rooms {
            let Some(members) = registry.rooms.get_mut(&room) else {
                continue;
            };
            members.remove(peer);
            if members.is_empty() {
                registry.rooms.remove(&room);
                departed.push((room, Vec::new()));
            } else {
                let remaining = members.iter().cloned().collect();
                departed.push((room, remaining));
            }
        }

        departed
    }

    /// Current members of `room`, empty if the room does not exist.
    pub async fn members(&self, room: &RoomId) -> Vec<PeerId> {
        let registry = self.inner.read().await;
        registry
            .rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
