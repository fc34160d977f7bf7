//! User → connection registry.
//!
//! Owned and mutated exclusively by the dispatcher task; nothing else holds
//! a reference to it, which is what makes every read a consistent snapshot.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;

use crate::identifiers::{ConnectionId, UserId};

use super::handle::ConnectionHandle;

// ============================================================================
// Registry
// ============================================================================

/// Mapping from user ID to the set of that user's live connections.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    /// Connections grouped by user. Users with no connection are removed.
    users: FxHashMap<UserId, FxHashMap<ConnectionId, ConnectionHandle>>,
    /// Running total across all users.
    total: usize,
}

impl Registry {
    /// Adds a handle under its user. Returns `false` if already present.
    pub(crate) fn insert(&mut self, handle: ConnectionHandle) -> bool {
        let connections = self.users.entry(handle.user_id().clone()).or_default();
        if connections.contains_key(&handle.id()) {
            return false;
        }
        connections.insert(handle.id(), handle);
        self.total += 1;
        true
    }

    /// Removes a handle. Returns `false` if it was not present.
    pub(crate) fn remove(&mut self, handle: &ConnectionHandle) -> bool {
        let Some(connections) = self.users.get_mut(handle.user_id()) else {
            return false;
        };

        if connections.remove(&handle.id()).is_none() {
            return false;
        }

        if connections.is_empty() {
            self.users.remove(handle.user_id());
        }
        self.total -= 1;
        true
    }

    /// Returns `true` if the handle is registered.
    pub(crate) fn contains(&self, handle: &ConnectionHandle) -> bool {
        self.users
            .get(handle.user_id())
            .is_some_and(|connections| connections.contains_key(&handle.id()))
    }

    /// Returns the handles currently registered for a user.
    pub(crate) fn handles(&self, user_id: &UserId) -> Vec<ConnectionHandle> {
        self.users
            .get(user_id)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of connections for one user.
    pub(crate) fn active(&self, user_id: &UserId) -> usize {
        self.users.get(user_id).map_or(0, |connections| connections.len())
    }

    /// Number of connections across all users.
    #[inline]
    pub(crate) fn total(&self) -> usize {
        self.total
    }

    /// Number of users with at least one connection.
    #[inline]
    pub(crate) fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Point-in-time list of users with at least one connection.
    pub(crate) fn user_ids(&self) -> Vec<UserId> {
        self.users.keys().cloned().collect()
    }

    /// Removes and returns every handle.
    pub(crate) fn drain(&mut self) -> Vec<ConnectionHandle> {
        self.total = 0;
        self.users
            .drain()
            .flat_map(|(_, connections)| connections.into_values())
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
