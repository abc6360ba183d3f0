//! # Storage Contract
//!
//! The interface every backend must satisfy, plus the bundled backends:
//! - `NativeStorage`: in-memory, single-threaded
//! - `ConcurrentStorage`: in-memory, shareable across threads
//! - `DeltaStorage`: overlay of a writable layer over a read-only base
//! - `RedbStorage`: disk-backed through the redb embedded database
//!
//! ## Contract
//!
//! - Every edge's endpoints exist as nodes in the same storage.
//! - Deleting a node cascades to every incoming and outgoing edge.
//! - Once `close()` has been called every method except `is_closed` fails
//!   with `TesselError::AccessClosedStorage`.

mod concurrent;
mod delta;
mod native;
mod redb_store;

pub use concurrent::ConcurrentStorage;
pub use delta::DeltaStorage;
pub use native::NativeStorage;
pub use redb_store::RedbStorage;

use crate::{EdgeId, NodeId, PropertyMap, PropertyUpdates, TesselError, Value};
use std::collections::BTreeSet;

// =============================================================================
// STORAGE TRAIT
// =============================================================================

/// The storage contract.
///
/// All fallible operations return `Result<T, TesselError>` so in-memory and
/// persistent backends can be used interchangeably.
pub trait Storage {
    /// Whether `close()` has been called. Never fails.
    fn is_closed(&self) -> bool;

    /// Check if a node exists.
    fn contains_node(&self, id: &NodeId) -> Result<bool, TesselError>;

    /// Check if an edge exists.
    fn contains_edge(&self, id: &EdgeId) -> Result<bool, TesselError>;

    /// Snapshot of every node id, in deterministic order.
    fn node_ids(&self) -> Result<Vec<NodeId>, TesselError>;

    /// Snapshot of every edge id, in deterministic order.
    fn edge_ids(&self) -> Result<Vec<EdgeId>, TesselError>;

    /// Create a node with initial properties.
    ///
    /// Fails with `EntityAlreadyExist` if the id is taken.
    fn add_node(&mut self, id: &NodeId, properties: PropertyMap) -> Result<(), TesselError>;

    /// Create an edge with initial properties.
    ///
    /// Fails with `EntityAlreadyExist` if the id is taken and with
    /// `EntityNotExist` if either endpoint is missing.
    fn add_edge(&mut self, id: &EdgeId, properties: PropertyMap) -> Result<(), TesselError>;

    /// All properties of a node.
    fn get_node_properties(&self, id: &NodeId) -> Result<PropertyMap, TesselError>;

    /// All properties of an edge.
    fn get_edge_properties(&self, id: &EdgeId) -> Result<PropertyMap, TesselError>;

    /// Apply property updates to a node. `None` removes, `Some` upserts.
    fn set_node_properties(
        &mut self,
        id: &NodeId,
        updates: PropertyUpdates,
    ) -> Result<(), TesselError>;

    /// Apply property updates to an edge. `None` removes, `Some` upserts.
    fn set_edge_properties(
        &mut self,
        id: &EdgeId,
        updates: PropertyUpdates,
    ) -> Result<(), TesselError>;

    /// Delete a node and every edge touching it.
    fn delete_node(&mut self, id: &NodeId) -> Result<(), TesselError>;

    /// Delete a single edge. Endpoints are untouched.
    fn delete_edge(&mut self, id: &EdgeId) -> Result<(), TesselError>;

    /// Edges whose destination is `id`.
    fn get_incoming_edges(&self, id: &NodeId) -> Result<BTreeSet<EdgeId>, TesselError>;

    /// Edges whose source is `id`.
    fn get_outgoing_edges(&self, id: &NodeId) -> Result<BTreeSet<EdgeId>, TesselError>;

    /// Read a metadata slot.
    fn get_meta(&self, name: &str) -> Result<Option<Value>, TesselError>;

    /// Write a metadata slot. `None` removes it.
    fn set_meta(&mut self, name: &str, value: Option<Value>) -> Result<(), TesselError>;

    /// Names of every set metadata slot, in deterministic order.
    fn meta_names(&self) -> Result<Vec<String>, TesselError>;

    /// Drop every node, edge and metadata slot.
    ///
    /// Returns whether anything was removed.
    fn clear(&mut self) -> Result<bool, TesselError>;

    /// Mark the storage permanently inaccessible.
    fn close(&mut self) -> Result<(), TesselError>;

    // -------------------------------------------------------------------------
    // Provided operations
    // -------------------------------------------------------------------------

    /// A single node property.
    fn get_node_property(&self, id: &NodeId, name: &str) -> Result<Option<Value>, TesselError> {
        Ok(self.get_node_properties(id)?.remove(name))
    }

    /// A single edge property.
    fn get_edge_property(&self, id: &EdgeId, name: &str) -> Result<Option<Value>, TesselError> {
        Ok(self.get_edge_properties(id)?.remove(name))
    }

    /// Edges going from `from` to `to`.
    fn get_edges_between(
        &self,
        from: &NodeId,
        to: &NodeId,
    ) -> Result<BTreeSet<EdgeId>, TesselError> {
        Ok(self
            .get_outgoing_edges(from)?
            .into_iter()
            .filter(|edge| &edge.dst == to)
            .collect())
    }

    /// Delete every node matching `predicate` (cascading to their edges).
    ///
    /// Matching ids are collected before the first deletion.
    fn delete_nodes(&mut self, predicate: &dyn Fn(&NodeId) -> bool) -> Result<usize, TesselError> {
        let doomed: Vec<NodeId> = self
            .node_ids()?
            .into_iter()
            .filter(|id| predicate(id))
            .collect();
        for id in &doomed {
            self.delete_node(id)?;
        }
        tracing::debug!(count = doomed.len(), "bulk node deletion");
        Ok(doomed.len())
    }

    /// Delete every edge matching `predicate`.
    ///
    /// Matching ids are collected before the first deletion.
    fn delete_edges(&mut self, predicate: &dyn Fn(&EdgeId) -> bool) -> Result<usize, TesselError> {
        let doomed: Vec<EdgeId> = self
            .edge_ids()?
            .into_iter()
            .filter(|id| predicate(id))
            .collect();
        for id in &doomed {
            self.delete_edge(id)?;
        }
        tracing::debug!(count = doomed.len(), "bulk edge deletion");
        Ok(doomed.len())
    }

    /// Total number of nodes.
    fn node_count(&self) -> Result<usize, TesselError> {
        Ok(self.node_ids()?.len())
    }

    /// Total number of edges.
    fn edge_count(&self) -> Result<usize, TesselError> {
        Ok(self.edge_ids()?.len())
    }
}

// =============================================================================
// SHARED HELPERS
// =============================================================================

/// Apply `updates` to `properties` in place.
pub(crate) fn apply_updates(properties: &mut PropertyMap, updates: PropertyUpdates) {
    for (name, value) in updates {
        match value {
            Some(value) => {
                properties.insert(name, value);
            }
            None => {
                properties.remove(&name);
            }
        }
    }
}

/// Fail fast on a closed backend.
pub(crate) fn ensure_open(closed: bool) -> Result<(), TesselError> {
    if closed {
        Err(TesselError::AccessClosedStorage)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_updates_upserts_and_removes() {
        let mut props = PropertyMap::new();
        props.insert("keep".into(), Value::from(1i64));
        props.insert("drop".into(), Value::from(2i64));

        let mut updates = PropertyUpdates::new();
        updates.insert("drop".into(), None);
        updates.insert("new".into(), Some(Value::from("x")));
        updates.insert("keep".into(), Some(Value::from(3i64)));
        apply_updates(&mut props, updates);

        assert_eq!(props.len(), 2);
        assert_eq!(props.get("keep"), Some(&Value::from(3i64)));
        assert_eq!(props.get("new"), Some(&Value::from("x")));
    }

    #[test]
    fn ensure_open_rejects_closed() {
        assert!(ensure_open(false).is_ok());
        assert!(matches!(
            ensure_open(true),
            Err(TesselError::AccessClosedStorage)
        ));
    }
}
