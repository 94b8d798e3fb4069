//! The two group membership sets.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::websocket::connection::{Connection, ConnectionId, Group};

type Members = DashMap<ConnectionId, Arc<Connection>>;

/// Live connections of both groups.
///
/// Shared by reference between every connection task, the bridge listener
/// and the reaper. No method awaits and none holds a shard lock past its
/// return, so callers never block each other for long.
#[derive(Default)]
pub struct ConnectionRegistry {
    group_a: Members,
    group_b: Members,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn members(&self, group: Group) -> &Members {
        match group {
            Group::A => &self.group_a,
            Group::B => &self.group_b,
        }
    }

    /// Add a connection to its own group.
    ///
    /// Returns `false` (and changes nothing) if it is already a member.
    pub fn add(&self, conn: Arc<Connection>) -> bool {
        match self.members(conn.group()).entry(conn.id().clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let _ = slot.insert(conn);
                true
            }
        }
    }

    /// Remove a connection. Returns `false` if it was not a member.
    pub fn remove(&self, group: Group, id: &ConnectionId) -> bool {
        self.members(group).remove(id).is_some()
    }

    /// Whether `id` is currently a member of `group`.
    pub fn contains(&self, group: Group, id: &ConnectionId) -> bool {
        self.members(group).contains_key(id)
    }

    /// Point-in-time copy of a group's members.
    ///
    /// Iterating the copy holds no lock; members added or removed
    /// afterwards are not reflected.
    pub fn snapshot(&self, group: Group) -> Vec<Arc<Connection>> {
        self.members(group)
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Remove every member of `group` that is no longer live and close it.
    ///
    /// Returns how many were removed.
    pub fn prune_closed(&self, group: Group) -> usize {
        let members = self.members(group);
        let dead: Vec<ConnectionId> = members
            .iter()
            .filter(|entry| !entry.value().is_live())
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in dead {
            // Re-check under the shard lock; the entry may have changed.
            if let Some((_, conn)) = members.remove_if(&id, |_, c| !c.is_live()) {
                debug!(conn_id = %id, %group, state = ?conn.state(), "pruned connection");
                conn.close();
                removed += 1;
            }
        }
        removed
    }

    /// Member count of one group.
    pub fn len(&self, group: Group) -> usize {
        self.members(group).len()
    }

    /// Whether a group has no members.
    pub fn is_empty(&self, group: Group) -> bool {
        self.members(group).is_empty()
    }

    /// Member count of both groups.
    pub fn total(&self) -> usize {
        self.group_a.len() + self.group_b.len()
    }
}
