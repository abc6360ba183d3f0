//! # Core Type Definitions
//!
//! This module contains the identity and error types shared by every layer:
//! - Entity identifiers (`NodeId`, `EdgeId`, `EntityId`)
//! - Property values (`Value`, `PropertyMap`, `PropertyUpdates`)
//! - Error types (`TesselError`)
//!
//! ## Determinism Guarantees
//!
//! All identifiers:
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Compare structurally (an `EdgeId` is its triple, not its display name)

mod value;

pub use value::{PropertyMap, PropertyUpdates, Value};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// NODE IDENTIFIER
// =============================================================================

/// Identifier of a node: a single string name.
///
/// Serializes to the bare string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create a node identifier from a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for NodeId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

// =============================================================================
// EDGE IDENTIFIER
// =============================================================================

/// Identifier of a directed, typed edge.
///
/// Equality is structural over `(src, dst, edge_type)`. The textual name
/// `src-type-dst` is for display only: edge types may themselves contain
/// dashes. On the wire the id is the ordered triple `[src, dst, type]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "(NodeId, NodeId, String)", into = "(NodeId, NodeId, String)")]
pub struct EdgeId {
    /// Source node.
    pub src: NodeId,
    /// Destination node.
    pub dst: NodeId,
    /// Edge type.
    pub edge_type: String,
}

impl EdgeId {
    /// Create a new edge identifier.
    #[must_use]
    pub fn new(src: impl Into<NodeId>, dst: impl Into<NodeId>, edge_type: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            edge_type: edge_type.into(),
        }
    }

    /// The display name `src-type-dst`.
    #[must_use]
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Rebuild an identifier from its display name.
    ///
    /// The source ends at the first dash and the destination starts after the
    /// last one; whatever lies between is the type. Returns `None` when the
    /// name has fewer than two dashes.
    #[must_use]
    pub fn parse_name(name: &str) -> Option<Self> {
        let (src, rest) = name.split_once('-')?;
        let (edge_type, dst) = rest.rsplit_once('-')?;
        Some(Self::new(src, dst, edge_type))
    }

    /// Whether this edge touches `node` at either end.
    #[must_use]
    pub fn touches(&self, node: &NodeId) -> bool {
        &self.src == node || &self.dst == node
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.src, self.edge_type, self.dst)
    }
}

impl From<(NodeId, NodeId, String)> for EdgeId {
    fn from((src, dst, edge_type): (NodeId, NodeId, String)) -> Self {
        Self { src, dst, edge_type }
    }
}

impl From<EdgeId> for (NodeId, NodeId, String) {
    fn from(id: EdgeId) -> Self {
        (id.src, id.dst, id.edge_type)
    }
}

// =============================================================================
// ENTITY IDENTIFIER
// =============================================================================

/// Identifier of either kind of entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityId {
    /// A node identifier.
    Node(NodeId),
    /// An edge identifier.
    Edge(EdgeId),
}

impl EntityId {
    /// Whether this identifies a node.
    #[must_use]
    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node(_))
    }

    /// Whether this identifies an edge.
    #[must_use]
    pub fn is_edge(&self) -> bool {
        matches!(self, Self::Edge(_))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node {id}"),
            Self::Edge(id) => write!(f, "edge {id}"),
        }
    }
}

impl From<NodeId> for EntityId {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl From<EdgeId> for EntityId {
    fn from(id: EdgeId) -> Self {
        Self::Edge(id)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Tessel engine.
///
/// - No silent failures
/// - Use `Result<T, TesselError>` for fallible operations
/// - The engine should never panic; all errors must be recoverable
#[derive(Debug, Error)]
pub enum TesselError {
    /// A read, update or delete referenced a missing node or edge.
    #[error("Entity does not exist: {0}")]
    EntityNotExist(EntityId),

    /// A create referenced an id that is already present.
    #[error("Entity already exists: {0}")]
    EntityAlreadyExist(EntityId),

    /// The storage was used after `close()`.
    #[error("Access to closed storage")]
    AccessClosedStorage,

    /// A property name uses the reserved engine prefix.
    #[error("Invalid property name: {0}")]
    InvalidPropName(String),

    /// Malformed argument (group or suffix names, unregistered group).
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// A thread panicked while holding a storage lock.
    #[error("Storage lock poisoned")]
    LockPoisoned,

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// A configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl TesselError {
    /// Missing node.
    #[must_use]
    pub fn node_not_exist(id: &NodeId) -> Self {
        Self::EntityNotExist(EntityId::Node(id.clone()))
    }

    /// Missing edge.
    #[must_use]
    pub fn edge_not_exist(id: &EdgeId) -> Self {
        Self::EntityNotExist(EntityId::Edge(id.clone()))
    }

    /// Duplicate node.
    #[must_use]
    pub fn node_exists(id: &NodeId) -> Self {
        Self::EntityAlreadyExist(EntityId::Node(id.clone()))
    }

    /// Duplicate edge.
    #[must_use]
    pub fn edge_exists(id: &EdgeId) -> Self {
        Self::EntityAlreadyExist(EntityId::Edge(id.clone()))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_name_format() {
        let id = EdgeId::new("a", "b", "knows");
        assert_eq!(id.name(), "a-knows-b");
    }

    #[test]
    fn edge_name_parse_keeps_dashed_types() {
        let id = EdgeId::new("a", "b", "g:depends-on");
        let parsed = EdgeId::parse_name(&id.name()).expect("parse");
        assert_eq!(parsed, id);

        assert!(EdgeId::parse_name("a-b").is_none());
    }

    #[test]
    fn edge_equality_is_structural() {
        // Same display name, different triples.
        let first = EdgeId::new("a", "c", "b-x");
        let second = EdgeId::new("a-b", "c", "x");
        assert_eq!(first.name(), second.name());
        assert_ne!(first, second);
    }

    #[test]
    fn edge_serializes_as_triple() {
        let id = EdgeId::new("n1", "n2", "rel");
        let bytes = postcard::to_allocvec(&id).expect("serialize");
        let triple: (String, String, String) = postcard::from_bytes(&bytes).expect("triple");
        assert_eq!(
            triple,
            ("n1".to_string(), "n2".to_string(), "rel".to_string())
        );
    }

    #[test]
    fn node_serializes_as_string() {
        let bytes = postcard::to_allocvec(&NodeId::new("node1")).expect("serialize");
        let name: String = postcard::from_bytes(&bytes).expect("string");
        assert_eq!(name, "node1");
    }

    #[test]
    fn entity_ids_order_nodes_first() {
        let node = EntityId::from(NodeId::new("z"));
        let edge = EntityId::from(EdgeId::new("a", "b", "t"));
        assert!(node < edge);
        assert!(node.is_node());
        assert!(edge.is_edge());
    }

    #[test]
    fn error_messages_name_the_entity() {
        let err = TesselError::node_not_exist(&NodeId::new("ghost"));
        assert_eq!(err.to_string(), "Entity does not exist: node ghost");
    }
}
