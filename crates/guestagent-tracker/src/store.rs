//! In-memory record of what is currently exposed per container.

use std::collections::HashMap;

use guestagent_common::ContainerId;
use parking_lot::RwLock;

use crate::portmap::PortMap;

/// Thread-safe registry of exposed ports keyed by container.
///
/// Every entry is written and removed whole under one lock, so readers never
/// see a port map that is halfway through being replaced. Nothing is
/// persisted; after a restart the container event source replays `add`.
#[derive(Debug, Default)]
pub struct PortStateStore {
    entries: RwLock<HashMap<ContainerId, PortMap>>,
}

impl PortStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for `id`.
    pub fn set(&self, id: ContainerId, ports: PortMap) {
        self.entries.write().insert(id, ports);
    }

    /// Copy of the entry for `id`.
    #[must_use]
    pub fn get(&self, id: &ContainerId) -> Option<PortMap> {
        self.entries.read().get(id).cloned()
    }

    /// Drop the entry for `id`, returning what was stored.
    pub fn delete(&self, id: &ContainerId) -> Option<PortMap> {
        self.entries.write().remove(id)
    }

    /// Drop every entry.
    pub fn delete_all(&self) {
        self.entries.write().clear();
    }

    /// Snapshot of every entry.
    #[must_use]
    pub fn list(&self) -> Vec<(ContainerId, PortMap)> {
        self.entries
            .read()
            .iter()
            .map(|(id, ports)| (id.clone(), ports.clone()))
            .collect()
    }

    /// Number of tracked containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no container is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
