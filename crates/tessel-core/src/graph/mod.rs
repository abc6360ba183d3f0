//! # Graph Facade
//!
//! `Graph` layers an identity cache, traversal and an edge-uniqueness policy
//! over any [`Storage`] backend.
//!
//! ## Visibility
//!
//! An entity is visible through the facade only when its id is in the cache
//! AND in the backing storage. Writes made directly on the backend stay
//! invisible until [`Graph::refresh_cache`] runs.
//!
//! ## Edge types
//!
//! Edges created through a facade are typed `"<graph name>:<type>"`, so
//! several facades can share one storage and each reloads only its own edges.

mod traversal;

pub use traversal::{Direction, Order, Walk};

use crate::entity::{Edge, Node};
use crate::group;
use crate::primitives::EDGE_TYPE_SEPARATOR;
use crate::storage::Storage;
use crate::{EdgeId, NodeId, PropertyMap, TesselError};
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;

// =============================================================================
// EDGE POLICIES
// =============================================================================

/// How `add_edge` picks the type of an untyped edge.
pub trait EdgePolicy {
    /// Type given to an edge created by [`Graph::add_edge`].
    fn untyped_edge_type() -> String;
}

/// At most one untyped edge per ordered node pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleEdge;

impl EdgePolicy for SingleEdge {
    fn untyped_edge_type() -> String {
        String::new()
    }
}

/// Any number of untyped edges per ordered node pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiEdge;

impl EdgePolicy for MultiEdge {
    fn untyped_edge_type() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

// =============================================================================
// GRAPH
// =============================================================================

/// Cache-synchronized view over a storage backend.
#[derive(Debug)]
pub struct Graph<S, P = SingleEdge> {
    storage: S,
    name: String,
    node_cache: BTreeSet<NodeId>,
    edge_cache: BTreeSet<EdgeId>,
    /// Highest suffix issued per group, mirrored from backend metadata.
    pub(crate) group_counters: BTreeMap<String, u64>,
    policy: PhantomData<P>,
}

impl<S: Storage, P: EdgePolicy> Graph<S, P> {
    /// Create a facade named `name` over `storage` with an empty cache.
    ///
    /// The name must be non-empty and free of `:`.
    ///
    /// Group counters are loaded from the backend's metadata.
    pub fn new(storage: S, name: impl Into<String>) -> Result<Self, TesselError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TesselError::IllegalArgument(
                "graph name must not be empty".to_string(),
            ));
        }
        if name.contains(EDGE_TYPE_SEPARATOR) {
            return Err(TesselError::IllegalArgument(format!(
                "graph name '{name}' must not contain '{EDGE_TYPE_SEPARATOR}'"
            )));
        }
        let group_counters = group::load_counters(&storage, &group::group_prefix(&name))?;
        Ok(Self {
            storage,
            name,
            node_cache: BTreeSet::new(),
            edge_cache: BTreeSet::new(),
            group_counters,
            policy: PhantomData,
        })
    }

    /// Create a facade and load every entity it can see from storage.
    pub fn open(storage: S, name: impl Into<String>) -> Result<Self, TesselError> {
        let mut graph = Self::new(storage, name)?;
        graph.refresh_cache()?;
        Ok(graph)
    }

    /// The graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Mutable access to the backing storage. Changes made here bypass the
    /// cache.
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Give the storage back, dropping the cache.
    pub fn into_storage(self) -> S {
        self.storage
    }

    fn qualified_type(&self, edge_type: &str) -> String {
        format!("{}{}{}", self.name, EDGE_TYPE_SEPARATOR, edge_type)
    }

    // -------------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------------

    /// Whether the node is visible through this facade.
    pub fn contain_node(&self, id: &NodeId) -> Result<bool, TesselError> {
        Ok(self.node_cache.contains(id) && self.storage.contains_node(id)?)
    }

    /// Create a node without properties.
    pub fn add_node(&mut self, id: impl Into<NodeId>) -> Result<Node, TesselError> {
        self.add_node_with(id, PropertyMap::new())
    }

    /// Create a node with initial properties.
    pub fn add_node_with(
        &mut self,
        id: impl Into<NodeId>,
        properties: PropertyMap,
    ) -> Result<Node, TesselError> {
        let id = id.into();
        self.storage.add_node(&id, properties)?;
        self.node_cache.insert(id.clone());
        Ok(Node::new(id))
    }

    /// Bind a node that already exists in storage to this facade.
    pub fn wrap_node(&mut self, node: &Node) -> Result<Node, TesselError> {
        if !self.storage.contains_node(node.id())? {
            return Err(TesselError::node_not_exist(node.id()));
        }
        self.node_cache.insert(node.id().clone());
        Ok(node.clone())
    }

    /// The node, if visible.
    pub fn get_node(&self, id: &NodeId) -> Result<Option<Node>, TesselError> {
        Ok(self
            .contain_node(id)?
            .then(|| Node::new(id.clone())))
    }

    /// Delete a node and its edges. A node this facade does not know is left
    /// alone.
    pub fn del_node(&mut self, id: &NodeId) -> Result<(), TesselError> {
        if !self.node_cache.contains(id) {
            return Ok(());
        }
        if self.storage.contains_node(id)? {
            self.storage.delete_node(id)?;
        }
        self.node_cache.remove(id);
        self.edge_cache.retain(|edge| !edge.touches(id));
        Ok(())
    }

    /// Visible nodes matching `predicate`, in id order.
    ///
    /// Storage failures surface as `Err` items.
    pub fn get_all_nodes<'a>(
        &'a self,
        predicate: impl Fn(&Node) -> bool + 'a,
    ) -> impl Iterator<Item = Result<Node, TesselError>> + 'a {
        self.node_cache
            .iter()
            .filter_map(move |id| match self.storage.contains_node(id) {
                Ok(true) => {
                    let node = Node::new(id.clone());
                    predicate(&node).then_some(Ok(node))
                }
                Ok(false) => None,
                Err(e) => Some(Err(e)),
            })
    }

    /// Number of visible nodes.
    pub fn node_count(&self) -> Result<usize, TesselError> {
        self.get_all_nodes(|_| true)
            .try_fold(0usize, |count, node| node.map(|_| count.saturating_add(1)))
    }

    // -------------------------------------------------------------------------
    // Edges
    // -------------------------------------------------------------------------

    /// Whether the edge is visible through this facade.
    pub fn contain_edge(&self, id: &EdgeId) -> Result<bool, TesselError> {
        Ok(self.edge_cache.contains(id) && self.storage.contains_edge(id)?)
    }

    /// Create (or adopt) the edge `from -> to` of the given type.
    ///
    /// Both endpoints must exist in storage; they are bound to the facade if
    /// they were not already. An existing storage edge with the same id is
    /// adopted instead of failing.
    pub fn add_typed_edge(
        &mut self,
        from: &NodeId,
        to: &NodeId,
        edge_type: &str,
    ) -> Result<Edge, TesselError> {
        self.wrap_node(&Node::new(from.clone()))?;
        self.wrap_node(&Node::new(to.clone()))?;

        let id = EdgeId::new(from.clone(), to.clone(), self.qualified_type(edge_type));
        if !self.storage.contains_edge(&id)? {
            self.storage.add_edge(&id, PropertyMap::new())?;
        }
        self.edge_cache.insert(id.clone());
        Ok(Edge::new(id))
    }

    /// The edge `from -> to` of the given type, if visible.
    pub fn get_typed_edge(
        &self,
        from: &NodeId,
        to: &NodeId,
        edge_type: &str,
    ) -> Result<Option<Edge>, TesselError> {
        let id = EdgeId::new(from.clone(), to.clone(), self.qualified_type(edge_type));
        Ok(self.contain_edge(&id)?.then(|| Edge::new(id)))
    }

    /// Create an edge whose type is chosen by the edge policy.
    pub fn add_edge(&mut self, from: &NodeId, to: &NodeId) -> Result<Edge, TesselError> {
        self.add_typed_edge(from, to, &P::untyped_edge_type())
    }

    /// Every visible edge going from `from` to `to`.
    pub fn get_edges(&self, from: &NodeId, to: &NodeId) -> Result<Vec<Edge>, TesselError> {
        if !self.contain_node(from)? || !self.contain_node(to)? {
            return Ok(Vec::new());
        }
        Ok(self
            .storage
            .get_edges_between(from, to)?
            .into_iter()
            .filter(|id| self.edge_cache.contains(id))
            .map(Edge::new)
            .collect())
    }

    /// Delete an edge. Its endpoints stay. An edge this facade does not know
    /// is left alone.
    pub fn del_edge(&mut self, id: &EdgeId) -> Result<(), TesselError> {
        if !self.edge_cache.remove(id) {
            return Ok(());
        }
        if self.storage.contains_edge(id)? {
            self.storage.delete_edge(id)?;
        }
        Ok(())
    }

    /// Visible edges matching `predicate`, in id order.
    ///
    /// Storage failures surface as `Err` items.
    pub fn get_all_edges<'a>(
        &'a self,
        predicate: impl Fn(&Edge) -> bool + 'a,
    ) -> impl Iterator<Item = Result<Edge, TesselError>> + 'a {
        self.edge_cache
            .iter()
            .filter_map(move |id| match self.storage.contains_edge(id) {
                Ok(true) => {
                    let edge = Edge::new(id.clone());
                    predicate(&edge).then_some(Ok(edge))
                }
                Ok(false) => None,
                Err(e) => Some(Err(e)),
            })
    }

    /// Number of visible edges.
    pub fn edge_count(&self) -> Result<usize, TesselError> {
        self.get_all_edges(|_| true)
            .try_fold(0usize, |count, edge| edge.map(|_| count.saturating_add(1)))
    }

    /// Visible edges ending at `id`. Empty for an unknown node.
    pub fn get_incoming_edges(&self, id: &NodeId) -> Result<Vec<Edge>, TesselError> {
        self.adjacent(id, Direction::Incoming)
    }

    /// Visible edges starting at `id`. Empty for an unknown node.
    pub fn get_outgoing_edges(&self, id: &NodeId) -> Result<Vec<Edge>, TesselError> {
        self.adjacent(id, Direction::Outgoing)
    }

    fn adjacent(&self, id: &NodeId, direction: Direction) -> Result<Vec<Edge>, TesselError> {
        if !self.contain_node(id)? {
            return Ok(Vec::new());
        }
        let ids = match direction {
            Direction::Incoming => self.storage.get_incoming_edges(id)?,
            Direction::Outgoing => self.storage.get_outgoing_edges(id)?,
        };
        Ok(ids
            .into_iter()
            .filter(|edge| self.edge_cache.contains(edge))
            .map(Edge::new)
            .collect())
    }

    /// Nodes across visible edges matching `edge_cond`, each once, in id
    /// order.
    pub(crate) fn neighbors(
        &self,
        id: &NodeId,
        direction: Direction,
        edge_cond: &dyn Fn(&Edge) -> bool,
    ) -> Result<BTreeSet<NodeId>, TesselError> {
        Ok(self
            .adjacent(id, direction)?
            .into_iter()
            .filter(|edge| edge_cond(edge))
            .map(|edge| match direction {
                Direction::Incoming => edge.into_id().src,
                Direction::Outgoing => edge.into_id().dst,
            })
            .collect())
    }

    // -------------------------------------------------------------------------
    // Traversal
    // -------------------------------------------------------------------------

    /// Destinations of outgoing edges matching `edge_cond`.
    pub fn get_children(
        &self,
        id: &NodeId,
        edge_cond: impl Fn(&Edge) -> bool,
    ) -> Result<Vec<Node>, TesselError> {
        Ok(self
            .neighbors(id, Direction::Outgoing, &edge_cond)?
            .into_iter()
            .map(Node::new)
            .collect())
    }

    /// Sources of incoming edges matching `edge_cond`.
    pub fn get_parents(
        &self,
        id: &NodeId,
        edge_cond: impl Fn(&Edge) -> bool,
    ) -> Result<Vec<Node>, TesselError> {
        Ok(self
            .neighbors(id, Direction::Incoming, &edge_cond)?
            .into_iter()
            .map(Node::new)
            .collect())
    }

    /// Breadth-first walk over outgoing edges. The start node is not yielded.
    pub fn get_descendants<F>(&self, id: &NodeId, edge_cond: F) -> Walk<'_, S, P, F>
    where
        F: Fn(&Edge) -> bool,
    {
        Walk::new(self, id.clone(), Direction::Outgoing, Order::BreadthFirst, edge_cond)
    }

    /// Depth-first walk over incoming edges. The start node is not yielded.
    pub fn get_ancestors<F>(&self, id: &NodeId, edge_cond: F) -> Walk<'_, S, P, F>
    where
        F: Fn(&Edge) -> bool,
    {
        Walk::new(self, id.clone(), Direction::Incoming, Order::DepthFirst, edge_cond)
    }

    // -------------------------------------------------------------------------
    // Cache & lifecycle
    // -------------------------------------------------------------------------

    /// Rebuild the cache from storage.
    ///
    /// Loads every node and every edge typed for this graph. Group counters
    /// are reloaded from metadata as well.
    pub fn refresh_cache(&mut self) -> Result<(), TesselError> {
        self.clear_cache();
        let prefix = self.qualified_type("");

        self.node_cache.extend(self.storage.node_ids()?);
        for id in self.storage.edge_ids()? {
            if id.edge_type.starts_with(&prefix) {
                self.node_cache.insert(id.src.clone());
                self.node_cache.insert(id.dst.clone());
                self.edge_cache.insert(id);
            }
        }
        self.group_counters =
            group::load_counters(&self.storage, &group::group_prefix(&self.name))?;

        tracing::debug!(
            graph = %self.name,
            nodes = self.node_cache.len(),
            edges = self.edge_cache.len(),
            "cache refreshed"
        );
        Ok(())
    }

    /// Forget every cached id. Storage is untouched.
    pub fn clear_cache(&mut self) {
        self.node_cache.clear();
        self.edge_cache.clear();
    }

    /// Clear the cache and close the storage.
    pub fn close(&mut self) -> Result<(), TesselError> {
        self.clear_cache();
        self.storage.close()?;
        tracing::debug!(graph = %self.name, "graph closed");
        Ok(())
    }
}

impl<S: Storage> Graph<S, SingleEdge> {
    /// The single visible edge `from -> to`, or `None` when there is no edge
    /// or more than one.
    pub fn get_edge(&self, from: &NodeId, to: &NodeId) -> Result<Option<Edge>, TesselError> {
        let mut edges = self.get_edges(from, to)?;
        Ok(if edges.len() == 1 { edges.pop() } else { None })
    }
}

// =============================================================================
// TESTS
// =============================================================================
