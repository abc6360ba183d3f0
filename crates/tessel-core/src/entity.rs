//! # Entity Accessors
//!
//! `Node` and `Edge` are thin value handles. They carry only an identifier;
//! every property read or write goes through the storage handle passed to the
//! call, so an accessor never outlives or hides its backend.
//!
//! Property names starting with `RESERVED_PROP_PREFIX` belong to the engine
//! and are rejected on user writes with `TesselError::InvalidPropName`.

use crate::primitives::{DEFAULT_NODE_TYPE, EDGE_TYPE_SEPARATOR, RESERVED_PROP_PREFIX, TYPE_PROP};
use crate::storage::Storage;
use crate::{EdgeId, EntityId, NodeId, PropertyMap, PropertyUpdates, TesselError, Value};
use std::fmt;

// =============================================================================
// NAMED VARIANTS
// =============================================================================

/// Fixed name table for a fieldless enum stored as a string property.
///
/// Implement it with [`named_variants!`](crate::named_variants).
pub trait NamedVariant: Copy + PartialEq + 'static {
    /// Every variant paired with its stored name.
    const VARIANTS: &'static [(&'static str, Self)];

    /// The stored name of this variant.
    fn variant_name(self) -> &'static str {
        Self::VARIANTS
            .iter()
            .find(|(_, variant)| *variant == self)
            .map_or("", |(name, _)| *name)
    }

    /// Look a variant up by its stored name.
    fn from_variant_name(name: &str) -> Option<Self> {
        Self::VARIANTS
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, variant)| *variant)
    }
}

/// Build the [`NamedVariant`] table for an enum.
///
/// ```
/// use tessel_core::named_variants;
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Color {
///     Red,
///     Blue,
/// }
///
/// named_variants!(Color { Red => "red", Blue => "blue" });
/// ```
#[macro_export]
macro_rules! named_variants {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $crate::entity::NamedVariant for $ty {
            const VARIANTS: &'static [(&'static str, Self)] = &[$(($name, Self::$variant)),+];
        }
    };
}

/// Reject engine-owned property names.
pub fn validate_prop_name(name: &str) -> Result<(), TesselError> {
    if name.starts_with(RESERVED_PROP_PREFIX) {
        return Err(TesselError::InvalidPropName(name.to_string()));
    }
    Ok(())
}

// =============================================================================
// ENTITY TRAIT
// =============================================================================

/// Property access shared by nodes and edges.
///
/// Implementors supply raw reads and writes; the provided methods add name
/// validation, reserved-name filtering and typed access on top.
pub trait Entity {
    /// The identifier as the closed node/edge sum type.
    fn entity_id(&self) -> EntityId;

    /// Every stored property, engine-owned ones included.
    fn raw_properties(&self, storage: &dyn Storage) -> Result<PropertyMap, TesselError>;

    /// Apply updates without name validation.
    fn raw_update(
        &self,
        storage: &mut dyn Storage,
        updates: PropertyUpdates,
    ) -> Result<(), TesselError>;

    /// User-visible properties.
    fn properties(&self, storage: &dyn Storage) -> Result<PropertyMap, TesselError> {
        let mut properties = self.raw_properties(storage)?;
        properties.retain(|name, _| !name.starts_with(RESERVED_PROP_PREFIX));
        Ok(properties)
    }

    /// A single property, `None` when unset.
    fn get(&self, storage: &dyn Storage, name: &str) -> Result<Option<Value>, TesselError> {
        Ok(self.raw_properties(storage)?.remove(name))
    }

    /// Set a single property.
    fn set(
        &self,
        storage: &mut dyn Storage,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), TesselError>
    where
        Self: Sized,
    {
        validate_prop_name(name)?;
        let mut updates = PropertyUpdates::new();
        updates.insert(name.to_string(), Some(value.into()));
        self.raw_update(storage, updates)
    }

    /// Remove a single property. Removing an unset property is a no-op.
    fn remove(&self, storage: &mut dyn Storage, name: &str) -> Result<(), TesselError> {
        validate_prop_name(name)?;
        let mut updates = PropertyUpdates::new();
        updates.insert(name.to_string(), None);
        self.raw_update(storage, updates)
    }

    /// Apply a batch of updates. Nothing is written if any name is reserved.
    fn update(&self, storage: &mut dyn Storage, updates: PropertyUpdates) -> Result<(), TesselError> {
        for name in updates.keys() {
            validate_prop_name(name)?;
        }
        self.raw_update(storage, updates)
    }

    /// Read an enum-valued property through its name table.
    fn get_enum<E: NamedVariant>(
        &self,
        storage: &dyn Storage,
        name: &str,
    ) -> Result<Option<E>, TesselError>
    where
        Self: Sized,
    {
        match self.get(storage, name)? {
            None => Ok(None),
            Some(Value::Str(stored)) => E::from_variant_name(&stored).map(Some).ok_or_else(|| {
                TesselError::IllegalArgument(format!("unknown variant '{stored}' in {name}"))
            }),
            Some(other) => Err(TesselError::IllegalArgument(format!(
                "{name} holds {}, not a variant name",
                other.kind()
            ))),
        }
    }

    /// Store an enum-valued property by its variant name.
    fn set_enum<E: NamedVariant>(
        &self,
        storage: &mut dyn Storage,
        name: &str,
        value: E,
    ) -> Result<(), TesselError>
    where
        Self: Sized,
    {
        self.set(storage, name, value.variant_name())
    }
}

// =============================================================================
// NODE
// =============================================================================

/// Handle to a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node {
    id: NodeId,
}

impl Node {
    /// Wrap a node id.
    #[must_use]
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self { id: id.into() }
    }

    /// The node id.
    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Unwrap into the node id.
    #[must_use]
    pub fn into_id(self) -> NodeId {
        self.id
    }

    /// The node's type descriptor, `"node"` when never set.
    pub fn node_type(&self, storage: &dyn Storage) -> Result<String, TesselError> {
        Ok(match self.get(storage, TYPE_PROP)? {
            Some(Value::Str(name)) => name,
            _ => DEFAULT_NODE_TYPE.to_string(),
        })
    }

    /// Record the node's type descriptor.
    pub fn set_node_type(&self, storage: &mut dyn Storage, name: &str) -> Result<(), TesselError> {
        let mut updates = PropertyUpdates::new();
        updates.insert(TYPE_PROP.to_string(), Some(Value::from(name)));
        self.raw_update(storage, updates)
    }
}

impl Entity for Node {
    fn entity_id(&self) -> EntityId {
        EntityId::Node(self.id.clone())
    }

    fn raw_properties(&self, storage: &dyn Storage) -> Result<PropertyMap, TesselError> {
        storage.get_node_properties(&self.id)
    }

    fn raw_update(
        &self,
        storage: &mut dyn Storage,
        updates: PropertyUpdates,
    ) -> Result<(), TesselError> {
        storage.set_node_properties(&self.id, updates)
    }
}

impl AsRef<NodeId> for Node {
    fn as_ref(&self) -> &NodeId {
        &self.id
    }
}

impl From<NodeId> for Node {
    fn from(id: NodeId) -> Self {
        Self { id }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

// =============================================================================
// EDGE
// =============================================================================

/// Handle to a directed edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    id: EdgeId,
}

impl Edge {
    /// Wrap an edge id.
    #[must_use]
    pub fn new(id: EdgeId) -> Self {
        Self { id }
    }

    /// The edge id.
    #[must_use]
    pub fn id(&self) -> &EdgeId {
        &self.id
    }

    /// Unwrap into the edge id.
    #[must_use]
    pub fn into_id(self) -> EdgeId {
        self.id
    }

    /// Source endpoint.
    #[must_use]
    pub fn src(&self) -> Node {
        Node::new(self.id.src.clone())
    }

    /// Destination endpoint.
    #[must_use]
    pub fn dst(&self) -> Node {
        Node::new(self.id.dst.clone())
    }

    /// The edge type with any `<graph>:` qualifier stripped.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.id
            .edge_type
            .split_once(EDGE_TYPE_SEPARATOR)
            .map_or(self.id.edge_type.as_str(), |(_, name)| name)
    }
}

impl Entity for Edge {
    fn entity_id(&self) -> EntityId {
        EntityId::Edge(self.id.clone())
    }

    fn raw_properties(&self, storage: &dyn Storage) -> Result<PropertyMap, TesselError> {
        storage.get_edge_properties(&self.id)
    }

    fn raw_update(
        &self,
        storage: &mut dyn Storage,
        updates: PropertyUpdates,
    ) -> Result<(), TesselError> {
        storage.set_edge_properties(&self.id, updates)
    }
}

impl AsRef<EdgeId> for Edge {
    fn as_ref(&self) -> &EdgeId {
        &self.id
    }
}

impl From<EdgeId> for Edge {
    fn from(id: EdgeId) -> Self {
        Self { id }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NativeStorage;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Status {
        Draft,
        Published,
    }

    crate::named_variants!(Status {
        Draft => "draft",
        Published => "published",
    });

    fn storage_with(ids: &[&str]) -> NativeStorage {
        let mut storage = NativeStorage::new();
        for id in ids {
            storage
                .add_node(&NodeId::new(*id), PropertyMap::new())
                .expect("add");
        }
        storage
    }

    #[test]
    fn set_and_get_through_storage_handle() {
        let mut storage = storage_with(&["a"]);
        let node = Node::new("a");

        node.set(&mut storage, "weight", 5i64).expect("set");
        assert_eq!(
            node.get(&storage, "weight").expect("get"),
            Some(Value::from(5i64))
        );
        node.remove(&mut storage, "weight").expect("remove");
        assert_eq!(node.get(&storage, "weight").expect("get"), None);
    }

    #[test]
    fn reserved_names_rejected() {
        let mut storage = storage_with(&["a"]);
        let node = Node::new("a");

        assert!(matches!(
            node.set(&mut storage, "__type__", "forged"),
            Err(TesselError::InvalidPropName(_))
        ));

        let mut updates = PropertyUpdates::new();
        updates.insert("fine".into(), Some(Value::from(1i64)));
        updates.insert("__hidden".into(), Some(Value::from(2i64)));
        assert!(node.update(&mut storage, updates).is_err());
        // Nothing from the rejected batch was written.
        assert!(node.properties(&storage).expect("props").is_empty());
    }

    #[test]
    fn node_type_defaults_and_hides_from_properties() {
        let mut storage = storage_with(&["a"]);
        let node = Node::new("a");
        assert_eq!(node.node_type(&storage).expect("type"), "node");

        node.set_node_type(&mut storage, "person").expect("type");
        node.set(&mut storage, "age", 30i64).expect("set");

        assert_eq!(node.node_type(&storage).expect("type"), "person");
        let visible = node.properties(&storage).expect("props");
        assert_eq!(visible.len(), 1);
        assert!(visible.contains_key("age"));
        assert_eq!(node.raw_properties(&storage).expect("raw").len(), 2);
    }

    #[test]
    fn enum_properties_use_name_table() {
        let mut storage = storage_with(&["a"]);
        let node = Node::new("a");

        node.set_enum(&mut storage, "status", Status::Published)
            .expect("set");
        assert_eq!(
            node.get(&storage, "status").expect("get"),
            Some(Value::from("published"))
        );
        assert_eq!(
            node.get_enum::<Status>(&storage, "status").expect("get"),
            Some(Status::Published)
        );
        assert_eq!(Status::Draft.variant_name(), "draft");
    }

    #[test]
    fn enum_property_with_unknown_name_fails() {
        let mut storage = storage_with(&["a"]);
        let node = Node::new("a");
        node.set(&mut storage, "status", "archived").expect("set");

        assert!(matches!(
            node.get_enum::<Status>(&storage, "status"),
            Err(TesselError::IllegalArgument(_))
        ));
    }

    #[test]
    fn edge_accessors() {
        let mut storage = storage_with(&["a", "b"]);
        let id = EdgeId::new("a", "b", "g:knows");
        storage.add_edge(&id, PropertyMap::new()).expect("edge");
        let edge = Edge::new(id);

        assert_eq!(edge.type_name(), "knows");
        assert_eq!(edge.src(), Node::new("a"));
        assert_eq!(edge.dst(), Node::new("b"));

        edge.set(&mut storage, "since", 2020i64).expect("set");
        assert_eq!(
            edge.properties(&storage).expect("props").get("since"),
            Some(&Value::from(2020i64))
        );
    }

    #[test]
    fn missing_entity_surfaces_not_exist() {
        let storage = NativeStorage::new();
        assert!(matches!(
            Node::new("ghost").properties(&storage),
            Err(TesselError::EntityNotExist(_))
        ));
    }
}
