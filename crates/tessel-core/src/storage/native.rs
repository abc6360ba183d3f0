//! # Native Storage
//!
//! The in-memory reference backend.
//!
//! All data structures use `BTreeMap`/`BTreeSet` for deterministic ordering.
//! Not thread-safe: mutation goes through `&mut self` and nothing is locked.
//! Wrap it in `ConcurrentStorage` to share it between threads.

use super::{Storage, apply_updates, ensure_open};
use crate::{EdgeId, NodeId, PropertyMap, PropertyUpdates, TesselError, Value};
use std::collections::{BTreeMap, BTreeSet};

/// In-memory storage backend.
#[derive(Debug, Clone, Default)]
pub struct NativeStorage {
    /// Node properties: NodeId -> properties
    nodes: BTreeMap<NodeId, PropertyMap>,

    /// Edge properties: EdgeId -> properties
    edges: BTreeMap<EdgeId, PropertyMap>,

    /// Adjacency: node -> every edge touching it, either direction.
    /// Direction is recovered on read by comparing endpoints.
    adjacency: BTreeMap<NodeId, BTreeSet<EdgeId>>,

    /// Free-form metadata slots.
    meta: BTreeMap<String, Value>,

    closed: bool,
}

impl NativeStorage {
    /// Create a new empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn node_props_mut(&mut self, id: &NodeId) -> Result<&mut PropertyMap, TesselError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| TesselError::node_not_exist(id))
    }

    fn edge_props_mut(&mut self, id: &EdgeId) -> Result<&mut PropertyMap, TesselError> {
        self.edges
            .get_mut(id)
            .ok_or_else(|| TesselError::edge_not_exist(id))
    }

    /// Incident edges of `id` filtered by `keep`.
    fn adjacent(
        &self,
        id: &NodeId,
        keep: impl Fn(&EdgeId) -> bool,
    ) -> Result<BTreeSet<EdgeId>, TesselError> {
        ensure_open(self.closed)?;
        if !self.nodes.contains_key(id) {
            return Err(TesselError::node_not_exist(id));
        }
        Ok(self
            .adjacency
            .get(id)
            .into_iter()
            .flatten()
            .filter(|edge| keep(edge))
            .cloned()
            .collect())
    }

    /// Remove an edge from the property table and both adjacency entries.
    fn unlink_edge(&mut self, id: &EdgeId) {
        self.edges.remove(id);
        for endpoint in [&id.src, &id.dst] {
            if let Some(incident) = self.adjacency.get_mut(endpoint) {
                incident.remove(id);
            }
        }
    }
}

impl Storage for NativeStorage {
    fn is_closed(&self) -> bool {
        self.closed
    }

    fn contains_node(&self, id: &NodeId) -> Result<bool, TesselError> {
        ensure_open(self.closed)?;
        Ok(self.nodes.contains_key(id))
    }

    fn contains_edge(&self, id: &EdgeId) -> Result<bool, TesselError> {
        ensure_open(self.closed)?;
        Ok(self.edges.contains_key(id))
    }

    fn node_ids(&self) -> Result<Vec<NodeId>, TesselError> {
        ensure_open(self.closed)?;
        Ok(self.nodes.keys().cloned().collect())
    }

    fn edge_ids(&self) -> Result<Vec<EdgeId>, TesselError> {
        ensure_open(self.closed)?;
        Ok(self.edges.keys().cloned().collect())
    }

    fn add_node(&mut self, id: &NodeId, properties: PropertyMap) -> Result<(), TesselError> {
        ensure_open(self.closed)?;
        if self.nodes.contains_key(id) {
            return Err(TesselError::node_exists(id));
        }
        self.nodes.insert(id.clone(), properties);
        self.adjacency.insert(id.clone(), BTreeSet::new());
        Ok(())
    }

    fn add_edge(&mut self, id: &EdgeId, properties: PropertyMap) -> Result<(), TesselError> {
        ensure_open(self.closed)?;
        if self.edges.contains_key(id) {
            return Err(TesselError::edge_exists(id));
        }
        for endpoint in [&id.src, &id.dst] {
            if !self.nodes.contains_key(endpoint) {
                return Err(TesselError::node_not_exist(endpoint));
            }
        }
        self.edges.insert(id.clone(), properties);
        for endpoint in [&id.src, &id.dst] {
            self.adjacency
                .entry(endpoint.clone())
                .or_default()
                .insert(id.clone());
        }
        Ok(())
    }

    fn get_node_properties(&self, id: &NodeId) -> Result<PropertyMap, TesselError> {
        ensure_open(self.closed)?;
        self.nodes
            .get(id)
            .cloned()
            .ok_or_else(|| TesselError::node_not_exist(id))
    }

    fn get_edge_properties(&self, id: &EdgeId) -> Result<PropertyMap, TesselError> {
        ensure_open(self.closed)?;
        self.edges
            .get(id)
            .cloned()
            .ok_or_else(|| TesselError::edge_not_exist(id))
    }

    fn get_node_property(&self, id: &NodeId, name: &str) -> Result<Option<Value>, TesselError> {
        ensure_open(self.closed)?;
        let props = self
            .nodes
            .get(id)
            .ok_or_else(|| TesselError::node_not_exist(id))?;
        Ok(props.get(name).cloned())
    }

    fn get_edge_property(&self, id: &EdgeId, name: &str) -> Result<Option<Value>, TesselError> {
        ensure_open(self.closed)?;
        let props = self
            .edges
            .get(id)
            .ok_or_else(|| TesselError::edge_not_exist(id))?;
        Ok(props.get(name).cloned())
    }

    fn set_node_properties(
        &mut self,
        id: &NodeId,
        updates: PropertyUpdates,
    ) -> Result<(), TesselError> {
        ensure_open(self.closed)?;
        apply_updates(self.node_props_mut(id)?, updates);
        Ok(())
    }

    fn set_edge_properties(
        &mut self,
        id: &EdgeId,
        updates: PropertyUpdates,
    ) -> Result<(), TesselError> {
        ensure_open(self.closed)?;
        apply_updates(self.edge_props_mut(id)?, updates);
        Ok(())
    }

    fn delete_node(&mut self, id: &NodeId) -> Result<(), TesselError> {
        ensure_open(self.closed)?;
        if self.nodes.remove(id).is_none() {
            return Err(TesselError::node_not_exist(id));
        }
        let incident = self.adjacency.remove(id).unwrap_or_default();
        for edge in &incident {
            self.unlink_edge(edge);
        }
        Ok(())
    }

    fn delete_edge(&mut self, id: &EdgeId) -> Result<(), TesselError> {
        ensure_open(self.closed)?;
        if !self.edges.contains_key(id) {
            return Err(TesselError::edge_not_exist(id));
        }
        self.unlink_edge(id);
        Ok(())
    }

    fn get_incoming_edges(&self, id: &NodeId) -> Result<BTreeSet<EdgeId>, TesselError> {
        self.adjacent(id, |edge| &edge.dst == id)
    }

    fn get_outgoing_edges(&self, id: &NodeId) -> Result<BTreeSet<EdgeId>, TesselError> {
        self.adjacent(id, |edge| &edge.src == id)
    }

    fn get_edges_between(
        &self,
        from: &NodeId,
        to: &NodeId,
    ) -> Result<BTreeSet<EdgeId>, TesselError> {
        self.adjacent(from, |edge| &edge.src == from && &edge.dst == to)
    }

    fn get_meta(&self, name: &str) -> Result<Option<Value>, TesselError> {
        ensure_open(self.closed)?;
        Ok(self.meta.get(name).cloned())
    }

    fn meta_names(&self) -> Result<Vec<String>, TesselError> {
        ensure_open(self.closed)?;
        Ok(self.meta.keys().cloned().collect())
    }

    fn set_meta(&mut self, name: &str, value: Option<Value>) -> Result<(), TesselError> {
        ensure_open(self.closed)?;
        match value {
            Some(value) => {
                self.meta.insert(name.to_string(), value);
            }
            None => {
                self.meta.remove(name);
            }
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<bool, TesselError> {
        ensure_open(self.closed)?;
        let had_data = !self.nodes.is_empty() || !self.meta.is_empty();
        self.nodes.clear();
        self.edges.clear();
        self.adjacency.clear();
        self.meta.clear();
        Ok(had_data)
    }

    fn close(&mut self) -> Result<(), TesselError> {
        self.clear()?;
        self.closed = true;
        tracing::debug!("native storage closed");
        Ok(())
    }

    fn node_count(&self) -> Result<usize, TesselError> {
        ensure_open(self.closed)?;
        Ok(self.nodes.len())
    }

    fn edge_count(&self) -> Result<usize, TesselError> {
        ensure_open(self.closed)?;
        Ok(self.edges.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, Value)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn two_nodes() -> NativeStorage {
        let mut storage = NativeStorage::new();
        storage
            .add_node(&NodeId::new("a"), PropertyMap::new())
            .expect("add a");
        storage
            .add_node(&NodeId::new("b"), PropertyMap::new())
            .expect("add b");
        storage
    }

    #[test]
    fn add_and_read_node() {
        let mut storage = NativeStorage::new();
        let id = NodeId::new("n");
        storage
            .add_node(&id, props(&[("name", Value::from("Alice"))]))
            .expect("add");

        assert!(storage.contains_node(&id).expect("contains"));
        assert_eq!(
            storage.get_node_property(&id, "name").expect("get"),
            Some(Value::from("Alice"))
        );
        assert_eq!(storage.get_node_property(&id, "age").expect("get"), None);
    }

    #[test]
    fn duplicate_node_rejected() {
        let mut storage = two_nodes();
        let result = storage.add_node(&NodeId::new("a"), PropertyMap::new());
        assert!(matches!(result, Err(TesselError::EntityAlreadyExist(_))));
    }

    #[test]
    fn edge_requires_endpoints() {
        let mut storage = two_nodes();
        let dangling = EdgeId::new("a", "missing", "t");
        let result = storage.add_edge(&dangling, PropertyMap::new());
        assert!(matches!(result, Err(TesselError::EntityNotExist(_))));
        assert_eq!(storage.edge_count().expect("count"), 0);
    }

    #[test]
    fn adjacency_filters_by_direction() {
        let mut storage = two_nodes();
        let ab = EdgeId::new("a", "b", "t");
        storage.add_edge(&ab, PropertyMap::new()).expect("edge");

        let a = NodeId::new("a");
        let b = NodeId::new("b");
        assert_eq!(storage.get_outgoing_edges(&a).expect("out").len(), 1);
        assert!(storage.get_incoming_edges(&a).expect("in").is_empty());
        assert_eq!(storage.get_incoming_edges(&b).expect("in").len(), 1);
        assert!(storage.get_outgoing_edges(&b).expect("out").is_empty());
        assert_eq!(
            storage.get_edges_between(&a, &b).expect("between"),
            BTreeSet::from([ab])
        );
    }

    #[test]
    fn self_loop_is_both_incoming_and_outgoing() {
        let mut storage = two_nodes();
        let aa = EdgeId::new("a", "a", "self");
        storage.add_edge(&aa, PropertyMap::new()).expect("edge");

        let a = NodeId::new("a");
        assert!(storage.get_outgoing_edges(&a).expect("out").contains(&aa));
        assert!(storage.get_incoming_edges(&a).expect("in").contains(&aa));

        storage.delete_node(&a).expect("delete");
        assert!(!storage.contains_edge(&aa).expect("contains"));
    }

    #[test]
    fn delete_node_cascades() {
        let mut storage = two_nodes();
        let ab = EdgeId::new("a", "b", "t");
        let ba = EdgeId::new("b", "a", "t");
        storage.add_edge(&ab, PropertyMap::new()).expect("edge");
        storage.add_edge(&ba, PropertyMap::new()).expect("edge");

        storage.delete_node(&NodeId::new("a")).expect("delete");

        assert_eq!(storage.edge_count().expect("count"), 0);
        assert!(
            storage
                .get_incoming_edges(&NodeId::new("b"))
                .expect("in")
                .is_empty()
        );
    }

    #[test]
    fn delete_edge_keeps_endpoints() {
        let mut storage = two_nodes();
        let ab = EdgeId::new("a", "b", "t");
        storage.add_edge(&ab, PropertyMap::new()).expect("edge");
        storage.delete_edge(&ab).expect("delete");

        assert_eq!(storage.node_count().expect("count"), 2);
        assert!(matches!(
            storage.delete_edge(&ab),
            Err(TesselError::EntityNotExist(_))
        ));
    }

    #[test]
    fn set_properties_null_removes() {
        let mut storage = NativeStorage::new();
        let id = NodeId::new("n");
        storage
            .add_node(&id, props(&[("a", Value::from(1i64)), ("b", Value::from(2i64))]))
            .expect("add");

        let mut updates = PropertyUpdates::new();
        updates.insert("a".into(), None);
        updates.insert("c".into(), Some(Value::from(3i64)));
        storage.set_node_properties(&id, updates).expect("set");

        let read = storage.get_node_properties(&id).expect("get");
        assert_eq!(
            read,
            props(&[("b", Value::from(2i64)), ("c", Value::from(3i64))])
        );
    }

    #[test]
    fn missing_entity_property_access_fails() {
        let storage = NativeStorage::new();
        assert!(matches!(
            storage.get_node_properties(&NodeId::new("ghost")),
            Err(TesselError::EntityNotExist(_))
        ));
        assert!(matches!(
            storage.get_outgoing_edges(&NodeId::new("ghost")),
            Err(TesselError::EntityNotExist(_))
        ));
    }

    #[test]
    fn bulk_delete_uses_snapshot() {
        let mut storage = NativeStorage::new();
        for name in ["x1", "x2", "y1"] {
            storage
                .add_node(&NodeId::new(name), PropertyMap::new())
                .expect("add");
        }
        storage
            .add_edge(&EdgeId::new("x1", "y1", "t"), PropertyMap::new())
            .expect("edge");

        let removed = storage
            .delete_nodes(&|id: &NodeId| id.as_str().starts_with('x'))
            .expect("bulk");

        assert_eq!(removed, 2);
        assert_eq!(storage.node_ids().expect("ids"), vec![NodeId::new("y1")]);
        assert_eq!(storage.edge_count().expect("count"), 0);
    }

    #[test]
    fn meta_roundtrip_and_removal() {
        let mut storage = NativeStorage::new();
        storage
            .set_meta("version", Some(Value::from(3i64)))
            .expect("set");
        assert_eq!(
            storage.get_meta("version").expect("get"),
            Some(Value::from(3i64))
        );
        assert_eq!(storage.meta_names().expect("names"), vec!["version".to_string()]);
        storage.set_meta("version", None).expect("remove");
        assert_eq!(storage.get_meta("version").expect("get"), None);
        assert!(storage.meta_names().expect("names").is_empty());
    }

    #[test]
    fn clear_reports_whether_anything_was_removed() {
        let mut storage = two_nodes();
        assert!(storage.clear().expect("clear"));
        assert!(!storage.clear().expect("clear again"));
    }

    #[test]
    fn closed_storage_fails_fast() {
        let mut storage = two_nodes();
        storage.close().expect("close");

        assert!(storage.is_closed());
        assert!(matches!(
            storage.contains_node(&NodeId::new("a")),
            Err(TesselError::AccessClosedStorage)
        ));
        assert!(matches!(
            storage.add_node(&NodeId::new("c"), PropertyMap::new()),
            Err(TesselError::AccessClosedStorage)
        ));
        assert!(matches!(
            storage.close(),
            Err(TesselError::AccessClosedStorage)
        ));
    }
}
