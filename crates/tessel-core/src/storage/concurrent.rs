//! # Concurrent Storage
//!
//! A thread-safe handle over `NativeStorage`.
//!
//! Every contract call holds one lock for its whole duration: the read lock
//! for queries, the write lock for add/delete/set/clear/close. Adjacency and
//! property-table updates of a single `add_edge` or `delete_node` are
//! therefore observed as a unit. Clones share the same state, so a clone can
//! be moved into each worker thread.

use super::{NativeStorage, Storage};
use crate::{EdgeId, NodeId, PropertyMap, PropertyUpdates, TesselError, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shareable in-memory storage guarded by a read/write lock.
#[derive(Debug, Clone, Default)]
pub struct ConcurrentStorage {
    inner: Arc<RwLock<NativeStorage>>,
}

impl ConcurrentStorage {
    /// Create a new empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing native storage.
    #[must_use]
    pub fn from_native(storage: NativeStorage) -> Self {
        Self {
            inner: Arc::new(RwLock::new(storage)),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, NativeStorage>, TesselError> {
        self.inner.read().map_err(|_| TesselError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, NativeStorage>, TesselError> {
        self.inner.write().map_err(|_| TesselError::LockPoisoned)
    }
}

impl Storage for ConcurrentStorage {
    fn is_closed(&self) -> bool {
        // A poisoned lock is as unusable as a closed one.
        self.inner.read().map(|s| s.is_closed()).unwrap_or(true)
    }

    fn contains_node(&self, id: &NodeId) -> Result<bool, TesselError> {
        self.read()?.contains_node(id)
    }

    fn contains_edge(&self, id: &EdgeId) -> Result<bool, TesselError> {
        self.read()?.contains_edge(id)
    }

    fn node_ids(&self) -> Result<Vec<NodeId>, TesselError> {
        self.read()?.node_ids()
    }

    fn edge_ids(&self) -> Result<Vec<EdgeId>, TesselError> {
        self.read()?.edge_ids()
    }

    fn add_node(&mut self, id: &NodeId, properties: PropertyMap) -> Result<(), TesselError> {
        self.write()?.add_node(id, properties)
    }

    fn add_edge(&mut self, id: &EdgeId, properties: PropertyMap) -> Result<(), TesselError> {
        self.write()?.add_edge(id, properties)
    }

    fn get_node_properties(&self, id: &NodeId) -> Result<PropertyMap, TesselError> {
        self.read()?.get_node_properties(id)
    }

    fn get_edge_properties(&self, id: &EdgeId) -> Result<PropertyMap, TesselError> {
        self.read()?.get_edge_properties(id)
    }

    fn get_node_property(&self, id: &NodeId, name: &str) -> Result<Option<Value>, TesselError> {
        self.read()?.get_node_property(id, name)
    }

    fn get_edge_property(&self, id: &EdgeId, name: &str) -> Result<Option<Value>, TesselError> {
        self.read()?.get_edge_property(id, name)
    }

    fn set_node_properties(
        &mut self,
        id: &NodeId,
        updates: PropertyUpdates,
    ) -> Result<(), TesselError> {
        self.write()?.set_node_properties(id, updates)
    }

    fn set_edge_properties(
        &mut self,
        id: &EdgeId,
        updates: PropertyUpdates,
    ) -> Result<(), TesselError> {
        self.write()?.set_edge_properties(id, updates)
    }

    fn delete_node(&mut self, id: &NodeId) -> Result<(), TesselError> {
        self.write()?.delete_node(id)
    }

    fn delete_edge(&mut self, id: &EdgeId) -> Result<(), TesselError> {
        self.write()?.delete_edge(id)
    }

    fn get_incoming_edges(&self, id: &NodeId) -> Result<BTreeSet<EdgeId>, TesselError> {
        self.read()?.get_incoming_edges(id)
    }

    fn get_outgoing_edges(&self, id: &NodeId) -> Result<BTreeSet<EdgeId>, TesselError> {
        self.read()?.get_outgoing_edges(id)
    }

    fn get_edges_between(
        &self,
        from: &NodeId,
        to: &NodeId,
    ) -> Result<BTreeSet<EdgeId>, TesselError> {
        self.read()?.get_edges_between(from, to)
    }

    fn get_meta(&self, name: &str) -> Result<Option<Value>, TesselError> {
        self.read()?.get_meta(name)
    }

    fn set_meta(&mut self, name: &str, value: Option<Value>) -> Result<(), TesselError> {
        self.write()?.set_meta(name, value)
    }

    fn meta_names(&self) -> Result<Vec<String>, TesselError> {
        self.read()?.meta_names()
    }

    fn clear(&mut self) -> Result<bool, TesselError> {
        self.write()?.clear()
    }

    fn close(&mut self) -> Result<(), TesselError> {
        self.write()?.close()
    }

    // Bulk deletions run under one write lock so the snapshot and the
    // deletions are a single unit.
    fn delete_nodes(&mut self, predicate: &dyn Fn(&NodeId) -> bool) -> Result<usize, TesselError> {
        self.write()?.delete_nodes(predicate)
    }

    fn delete_edges(&mut self, predicate: &dyn Fn(&EdgeId) -> bool) -> Result<usize, TesselError> {
        self.write()?.delete_edges(predicate)
    }

    fn node_count(&self) -> Result<usize, TesselError> {
        self.read()?.node_count()
    }

    fn edge_count(&self) -> Result<usize, TesselError> {
        self.read()?.edge_count()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn clones_share_state() {
        let mut first = ConcurrentStorage::new();
        let second = first.clone();

        first
            .add_node(&NodeId::new("a"), PropertyMap::new())
            .expect("add");
        assert!(second.contains_node(&NodeId::new("a")).expect("contains"));
    }

    #[test]
    fn parallel_writers_lose_no_updates() {
        let storage = ConcurrentStorage::new();
        let mut hub = storage.clone();
        hub.add_node(&NodeId::new("hub"), PropertyMap::new())
            .expect("hub");

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let mut handle = storage.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        let id = NodeId::new(format!("w{worker}-{i}"));
                        handle.add_node(&id, PropertyMap::new()).expect("add");
                        handle
                            .add_edge(&EdgeId::new("hub", id, "spoke"), PropertyMap::new())
                            .expect("edge");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        assert_eq!(storage.node_count().expect("count"), 401);
        assert_eq!(storage.edge_count().expect("count"), 400);
        assert_eq!(
            storage
                .get_outgoing_edges(&NodeId::new("hub"))
                .expect("out")
                .len(),
            400
        );
    }

    #[test]
    fn close_is_visible_to_every_clone() {
        let mut first = ConcurrentStorage::new();
        let second = first.clone();
        first.close().expect("close");

        assert!(second.is_closed());
        assert!(matches!(
            second.node_ids(),
            Err(TesselError::AccessClosedStorage)
        ));
    }
}
