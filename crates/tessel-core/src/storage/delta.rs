//! # Delta Storage
//!
//! Composes a read-only `base` layer and a writable `present` layer into one
//! logical storage.
//!
//! - Reads consult the tombstone set first, then `present`, then `base`.
//!   Property maps are merged with `present` winning, and values equal to the
//!   deletion sentinel are dropped from the result.
//! - Writes only ever touch `present`. A base-only entity is copied into
//!   `present` (endpoints first, for edges) the first time it is written.
//! - Deleting a base-resident entity records a tombstone; deleting a
//!   present-resident one also removes it from `present`.
//!
//! The base layer is never mutated, so one base can back several overlays.

use super::{NativeStorage, Storage, ensure_open};
use crate::primitives::DELETED_SENTINEL;
use crate::{EdgeId, EntityId, NodeId, PropertyMap, PropertyUpdates, TesselError, Value};
use std::collections::BTreeSet;

/// Overlay storage over an immutable base.
#[derive(Debug)]
pub struct DeltaStorage<B, P = NativeStorage> {
    base: B,
    present: P,
    /// Deletions not reconciled into `present`.
    tombstones: BTreeSet<EntityId>,
    closed: bool,
}

fn sentinel() -> Value {
    Value::Str(DELETED_SENTINEL.to_string())
}

fn is_sentinel(value: &Value) -> bool {
    value.as_str() == Some(DELETED_SENTINEL)
}

/// Base properties overlaid with present properties, minus removed ones.
fn merge(base: Option<PropertyMap>, present: Option<PropertyMap>) -> PropertyMap {
    let mut merged = base.unwrap_or_default();
    merged.extend(present.unwrap_or_default());
    merged.retain(|_, value| !is_sentinel(value));
    merged
}

/// Updates that hide every key of `stale` unless `fresh` sets it again.
fn masked(stale: PropertyMap, fresh: PropertyMap) -> PropertyMap {
    let mut combined: PropertyMap = stale.into_keys().map(|key| (key, sentinel())).collect();
    combined.extend(fresh);
    combined
}

impl<B: Storage> DeltaStorage<B, NativeStorage> {
    /// Overlay `base` with a fresh in-memory present layer.
    #[must_use]
    pub fn over(base: B) -> Self {
        Self::new(base, NativeStorage::new())
    }
}

impl<B: Storage, P: Storage> DeltaStorage<B, P> {
    /// Overlay `base` with the given present layer.
    #[must_use]
    pub fn new(base: B, present: P) -> Self {
        Self {
            base,
            present,
            tombstones: BTreeSet::new(),
            closed: false,
        }
    }

    /// The read-only layer.
    pub fn base(&self) -> &B {
        &self.base
    }

    /// The writable layer.
    pub fn present(&self) -> &P {
        &self.present
    }

    /// Identifiers deleted relative to the base layer.
    pub fn tombstones(&self) -> &BTreeSet<EntityId> {
        &self.tombstones
    }

    /// Split the overlay back into its layers and tombstones.
    pub fn into_parts(self) -> (B, P, BTreeSet<EntityId>) {
        (self.base, self.present, self.tombstones)
    }

    fn node_tombstoned(&self, id: &NodeId) -> bool {
        self.tombstones.contains(&EntityId::Node(id.clone()))
    }

    fn edge_tombstoned(&self, id: &EdgeId) -> bool {
        self.tombstones.contains(&EntityId::Edge(id.clone()))
    }

    fn node_visible(&self, id: &NodeId) -> Result<bool, TesselError> {
        ensure_open(self.closed)?;
        if self.node_tombstoned(id) {
            return Ok(false);
        }
        Ok(self.present.contains_node(id)? || self.base.contains_node(id)?)
    }

    fn edge_visible(&self, id: &EdgeId) -> Result<bool, TesselError> {
        ensure_open(self.closed)?;
        if self.edge_tombstoned(id) {
            return Ok(false);
        }
        Ok(self.present.contains_edge(id)? || self.base.contains_edge(id)?)
    }

    fn require_node(&self, id: &NodeId) -> Result<(), TesselError> {
        if self.node_visible(id)? {
            Ok(())
        } else {
            Err(TesselError::node_not_exist(id))
        }
    }

    fn require_edge(&self, id: &EdgeId) -> Result<(), TesselError> {
        if self.edge_visible(id)? {
            Ok(())
        } else {
            Err(TesselError::edge_not_exist(id))
        }
    }

    /// Make sure a visible node also exists in the present layer.
    fn materialize_node(&mut self, id: &NodeId) -> Result<(), TesselError> {
        if !self.present.contains_node(id)? {
            self.present.add_node(id, PropertyMap::new())?;
        }
        Ok(())
    }

    /// Make sure a visible edge (and its endpoints) exists in the present layer.
    fn materialize_edge(&mut self, id: &EdgeId) -> Result<(), TesselError> {
        self.materialize_node(&id.src)?;
        self.materialize_node(&id.dst)?;
        if !self.present.contains_edge(id)? {
            self.present.add_edge(id, PropertyMap::new())?;
        }
        Ok(())
    }

    /// Visible incident edges of `id`, from both layers.
    fn adjacent(
        &self,
        id: &NodeId,
        from_layer: impl Fn(&dyn Storage, &NodeId) -> Result<BTreeSet<EdgeId>, TesselError>,
    ) -> Result<BTreeSet<EdgeId>, TesselError> {
        self.require_node(id)?;
        let mut edges = BTreeSet::new();
        if self.base.contains_node(id)? {
            edges.extend(from_layer(&self.base, id)?);
        }
        if self.present.contains_node(id)? {
            edges.extend(from_layer(&self.present, id)?);
        }
        edges.retain(|edge| !self.edge_tombstoned(edge));
        Ok(edges)
    }

    fn translate(updates: PropertyUpdates) -> PropertyUpdates {
        updates
            .into_iter()
            .map(|(name, value)| (name, Some(value.unwrap_or_else(sentinel))))
            .collect()
    }
}

impl<B: Storage, P: Storage> Storage for DeltaStorage<B, P> {
    fn is_closed(&self) -> bool {
        self.closed
    }

    fn contains_node(&self, id: &NodeId) -> Result<bool, TesselError> {
        self.node_visible(id)
    }

    fn contains_edge(&self, id: &EdgeId) -> Result<bool, TesselError> {
        self.edge_visible(id)
    }

    fn node_ids(&self) -> Result<Vec<NodeId>, TesselError> {
        ensure_open(self.closed)?;
        let mut ids: BTreeSet<NodeId> = self.base.node_ids()?.into_iter().collect();
        ids.extend(self.present.node_ids()?);
        Ok(ids
            .into_iter()
            .filter(|id| !self.node_tombstoned(id))
            .collect())
    }

    fn edge_ids(&self) -> Result<Vec<EdgeId>, TesselError> {
        ensure_open(self.closed)?;
        let mut ids: BTreeSet<EdgeId> = self.base.edge_ids()?.into_iter().collect();
        ids.extend(self.present.edge_ids()?);
        Ok(ids
            .into_iter()
            .filter(|id| !self.edge_tombstoned(id))
            .collect())
    }

    fn add_node(&mut self, id: &NodeId, properties: PropertyMap) -> Result<(), TesselError> {
        if self.node_visible(id)? {
            return Err(TesselError::node_exists(id));
        }
        let mut initial = properties;
        if self.tombstones.remove(&EntityId::Node(id.clone())) && self.base.contains_node(id)? {
            initial = masked(self.base.get_node_properties(id)?, initial);
        }
        if self.present.contains_node(id)? {
            let updates = initial.into_iter().map(|(k, v)| (k, Some(v))).collect();
            self.present.set_node_properties(id, updates)
        } else {
            self.present.add_node(id, initial)
        }
    }

    fn add_edge(&mut self, id: &EdgeId, properties: PropertyMap) -> Result<(), TesselError> {
        if self.edge_visible(id)? {
            return Err(TesselError::edge_exists(id));
        }
        self.require_node(&id.src)?;
        self.require_node(&id.dst)?;
        self.materialize_node(&id.src)?;
        self.materialize_node(&id.dst)?;

        let mut initial = properties;
        if self.tombstones.remove(&EntityId::Edge(id.clone())) && self.base.contains_edge(id)? {
            initial = masked(self.base.get_edge_properties(id)?, initial);
        }
        if self.present.contains_edge(id)? {
            let updates = initial.into_iter().map(|(k, v)| (k, Some(v))).collect();
            self.present.set_edge_properties(id, updates)
        } else {
            self.present.add_edge(id, initial)
        }
    }

    fn get_node_properties(&self, id: &NodeId) -> Result<PropertyMap, TesselError> {
        self.require_node(id)?;
        let base = if self.base.contains_node(id)? {
            Some(self.base.get_node_properties(id)?)
        } else {
            None
        };
        let present = if self.present.contains_node(id)? {
            Some(self.present.get_node_properties(id)?)
        } else {
            None
        };
        Ok(merge(base, present))
    }

    fn get_edge_properties(&self, id: &EdgeId) -> Result<PropertyMap, TesselError> {
        self.require_edge(id)?;
        let base = if self.base.contains_edge(id)? {
            Some(self.base.get_edge_properties(id)?)
        } else {
            None
        };
        let present = if self.present.contains_edge(id)? {
            Some(self.present.get_edge_properties(id)?)
        } else {
            None
        };
        Ok(merge(base, present))
    }

    fn set_node_properties(
        &mut self,
        id: &NodeId,
        updates: PropertyUpdates,
    ) -> Result<(), TesselError> {
        self.require_node(id)?;
        self.materialize_node(id)?;
        self.present
            .set_node_properties(id, Self::translate(updates))
    }

    fn set_edge_properties(
        &mut self,
        id: &EdgeId,
        updates: PropertyUpdates,
    ) -> Result<(), TesselError> {
        self.require_edge(id)?;
        self.materialize_edge(id)?;
        self.present
            .set_edge_properties(id, Self::translate(updates))
    }

    fn delete_node(&mut self, id: &NodeId) -> Result<(), TesselError> {
        self.require_node(id)?;
        if self.base.contains_node(id)? {
            let mut incident = self.base.get_incoming_edges(id)?;
            incident.extend(self.base.get_outgoing_edges(id)?);
            self.tombstones
                .extend(incident.into_iter().map(EntityId::Edge));
            self.tombstones.insert(EntityId::Node(id.clone()));
        }
        if self.present.contains_node(id)? {
            self.present.delete_node(id)?;
        }
        Ok(())
    }

    fn delete_edge(&mut self, id: &EdgeId) -> Result<(), TesselError> {
        self.require_edge(id)?;
        if self.base.contains_edge(id)? {
            self.tombstones.insert(EntityId::Edge(id.clone()));
        }
        if self.present.contains_edge(id)? {
            self.present.delete_edge(id)?;
        }
        Ok(())
    }

    fn get_incoming_edges(&self, id: &NodeId) -> Result<BTreeSet<EdgeId>, TesselError> {
        self.adjacent(id, |layer, node| layer.get_incoming_edges(node))
    }

    fn get_outgoing_edges(&self, id: &NodeId) -> Result<BTreeSet<EdgeId>, TesselError> {
        self.adjacent(id, |layer, node| layer.get_outgoing_edges(node))
    }

    fn get_meta(&self, name: &str) -> Result<Option<Value>, TesselError> {
        ensure_open(self.closed)?;
        match self.present.get_meta(name)? {
            Some(value) if is_sentinel(&value) => Ok(None),
            Some(value) => Ok(Some(value)),
            None => self.base.get_meta(name),
        }
    }

    fn set_meta(&mut self, name: &str, value: Option<Value>) -> Result<(), TesselError> {
        ensure_open(self.closed)?;
        self.present
            .set_meta(name, Some(value.unwrap_or_else(sentinel)))
    }

    fn meta_names(&self) -> Result<Vec<String>, TesselError> {
        ensure_open(self.closed)?;
        let mut names: BTreeSet<String> = self.base.meta_names()?.into_iter().collect();
        names.extend(self.present.meta_names()?);
        let mut visible = Vec::with_capacity(names.len());
        for name in names {
            if self.get_meta(&name)?.is_some() {
                visible.push(name);
            }
        }
        Ok(visible)
    }

    fn clear(&mut self) -> Result<bool, TesselError> {
        ensure_open(self.closed)?;
        let had_tombstones = !self.tombstones.is_empty();
        self.tombstones.clear();
        Ok(self.present.clear()? || had_tombstones)
    }

    fn close(&mut self) -> Result<(), TesselError> {
        ensure_open(self.closed)?;
        self.present.close()?;
        self.tombstones.clear();
        self.closed = true;
        tracing::debug!("delta storage closed");
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn base_with_chain() -> NativeStorage {
        let mut base = NativeStorage::new();
        for name in ["a", "b", "c"] {
            let mut props = PropertyMap::new();
            props.insert("name".into(), Value::from(name));
            props.insert("layer".into(), Value::from("base"));
            base.add_node(&NodeId::new(name), props).expect("node");
        }
        base.add_edge(&EdgeId::new("a", "b", "t"), PropertyMap::new())
            .expect("edge");
        base.add_edge(&EdgeId::new("b", "c", "t"), PropertyMap::new())
            .expect("edge");
        base.set_meta("origin", Some(Value::from("base")))
            .expect("meta");
        base
    }

    fn set(name: &str, value: Option<Value>) -> PropertyUpdates {
        let mut updates = PropertyUpdates::new();
        updates.insert(name.to_string(), value);
        updates
    }

    #[test]
    fn overlay_write_leaves_base_untouched() {
        let mut delta = DeltaStorage::over(base_with_chain());
        let a = NodeId::new("a");

        delta
            .set_node_properties(&a, set("layer", Some(Value::from("present"))))
            .expect("set");

        assert_eq!(
            delta.get_node_property(&a, "layer").expect("get"),
            Some(Value::from("present"))
        );
        assert_eq!(
            delta.get_node_property(&a, "name").expect("get"),
            Some(Value::from("a"))
        );
        assert_eq!(
            delta.base().get_node_property(&a, "layer").expect("get"),
            Some(Value::from("base"))
        );
    }

    #[test]
    fn property_removal_is_masked_not_erased() {
        let mut delta = DeltaStorage::over(base_with_chain());
        let b = NodeId::new("b");

        delta
            .set_node_properties(&b, set("name", None))
            .expect("remove");

        assert_eq!(delta.get_node_property(&b, "name").expect("get"), None);
        assert!(!delta.get_node_properties(&b).expect("get").contains_key("name"));
        assert_eq!(
            delta.base().get_node_property(&b, "name").expect("get"),
            Some(Value::from("b"))
        );
    }

    #[test]
    fn deleting_base_node_tombstones_it_and_its_edges() {
        let mut delta = DeltaStorage::over(base_with_chain());
        let b = NodeId::new("b");

        delta.delete_node(&b).expect("delete");

        assert!(!delta.contains_node(&b).expect("contains"));
        assert!(delta.base().contains_node(&b).expect("base contains"));
        assert!(
            !delta
                .contains_edge(&EdgeId::new("a", "b", "t"))
                .expect("contains")
        );
        assert!(
            delta
                .get_outgoing_edges(&NodeId::new("a"))
                .expect("out")
                .is_empty()
        );
        assert_eq!(delta.edge_count().expect("count"), 0);
        assert_eq!(delta.tombstones().len(), 3);
    }

    #[test]
    fn deleting_present_node_removes_it_physically() {
        let mut delta = DeltaStorage::over(NativeStorage::new());
        let x = NodeId::new("x");
        delta.add_node(&x, PropertyMap::new()).expect("add");
        delta.delete_node(&x).expect("delete");

        assert!(!delta.present().contains_node(&x).expect("contains"));
        assert!(delta.tombstones().is_empty());
    }

    #[test]
    fn readding_tombstoned_node_hides_stale_base_properties() {
        let mut delta = DeltaStorage::over(base_with_chain());
        let c = NodeId::new("c");
        delta.delete_node(&c).expect("delete");

        let mut fresh = PropertyMap::new();
        fresh.insert("name".into(), Value::from("reborn"));
        delta.add_node(&c, fresh).expect("re-add");

        let props = delta.get_node_properties(&c).expect("get");
        assert_eq!(props.len(), 1);
        assert_eq!(props.get("name"), Some(&Value::from("reborn")));
        // The old incident edge stays deleted.
        assert!(
            delta
                .get_incoming_edges(&c)
                .expect("in")
                .is_empty()
        );
    }

    #[test]
    fn readding_visible_base_node_fails_and_changes_nothing() {
        let mut delta = DeltaStorage::over(base_with_chain());
        let a = NodeId::new("a");
        let mut fresh = PropertyMap::new();
        fresh.insert("name".into(), Value::from("other"));

        let result = delta.add_node(&a, fresh);
        assert!(matches!(result, Err(TesselError::EntityAlreadyExist(_))));
        assert!(!delta.present().contains_node(&a).expect("present"));
        assert_eq!(
            delta.get_node_property(&a, "name").expect("get"),
            Some(Value::from("a"))
        );
        assert!(
            delta
                .contains_edge(&EdgeId::new("a", "b", "t"))
                .expect("contains")
        );
    }

    #[test]
    fn readding_tombstoned_base_edge_clears_tombstone() {
        let mut delta = DeltaStorage::over(base_with_chain());
        let ab = EdgeId::new("a", "b", "t");
        delta.delete_edge(&ab).expect("delete");
        assert!(delta.tombstones().contains(&EntityId::Edge(ab.clone())));

        delta.add_edge(&ab, PropertyMap::new()).expect("re-add");
        assert!(delta.tombstones().is_empty());
        assert!(delta.contains_edge(&ab).expect("contains"));
        assert!(delta.get_edge_properties(&ab).expect("props").is_empty());
    }

    #[test]
    fn edge_between_base_nodes_lands_in_present() {
        let mut delta = DeltaStorage::over(base_with_chain());
        let ca = EdgeId::new("c", "a", "back");
        delta.add_edge(&ca, PropertyMap::new()).expect("edge");

        assert!(delta.present().contains_edge(&ca).expect("present"));
        assert!(!delta.base().contains_edge(&ca).expect("base"));
        let incoming = delta.get_incoming_edges(&NodeId::new("a")).expect("in");
        assert!(incoming.contains(&ca));
        // Materialized endpoints keep their base properties in the merged view.
        assert_eq!(
            delta
                .get_node_property(&NodeId::new("c"), "name")
                .expect("get"),
            Some(Value::from("c"))
        );
    }

    #[test]
    fn edge_to_tombstoned_node_rejected() {
        let mut delta = DeltaStorage::over(base_with_chain());
        delta.delete_node(&NodeId::new("c")).expect("delete");
        let result = delta.add_edge(&EdgeId::new("a", "c", "x"), PropertyMap::new());
        assert!(matches!(result, Err(TesselError::EntityNotExist(_))));
    }

    #[test]
    fn meta_reads_fall_back_to_base() {
        let mut delta = DeltaStorage::over(base_with_chain());
        assert_eq!(
            delta.get_meta("origin").expect("get"),
            Some(Value::from("base"))
        );
        delta.set_meta("origin", None).expect("remove");
        assert_eq!(delta.get_meta("origin").expect("get"), None);
        assert!(delta.meta_names().expect("names").is_empty());
        assert_eq!(
            delta.base().get_meta("origin").expect("get"),
            Some(Value::from("base"))
        );
    }

    #[test]
    fn clear_only_resets_overlay() {
        let mut delta = DeltaStorage::over(base_with_chain());
        delta.delete_node(&NodeId::new("a")).expect("delete");
        delta
            .add_node(&NodeId::new("z"), PropertyMap::new())
            .expect("add");

        assert!(delta.clear().expect("clear"));
        assert_eq!(delta.node_count().expect("count"), 3);
        assert!(delta.contains_node(&NodeId::new("a")).expect("contains"));
        assert!(!delta.contains_node(&NodeId::new("z")).expect("contains"));
    }

    #[test]
    fn close_propagates_to_present_only() {
        let mut delta = DeltaStorage::over(base_with_chain());
        delta.close().expect("close");
        assert!(delta.is_closed());
        assert!(matches!(
            delta.node_ids(),
            Err(TesselError::AccessClosedStorage)
        ));

        let (base, present, _) = delta.into_parts();
        assert!(present.is_closed());
        assert!(!base.is_closed());
    }
}
