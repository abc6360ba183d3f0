//! Lazy graph walks.

use super::{EdgePolicy, Graph};
use crate::entity::{Edge, Node};
use crate::storage::Storage;
use crate::{NodeId, TesselError};
use std::collections::{BTreeSet, VecDeque};

/// Which edges a walk follows out of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Edges ending at the node; the walk moves to their sources.
    Incoming,
    /// Edges starting at the node; the walk moves to their destinations.
    Outgoing,
}

/// Frontier discipline of a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Queue: nearest nodes first.
    BreadthFirst,
    /// Stack: follow one branch before the next.
    DepthFirst,
}

/// Iterator over the nodes reachable from a start node.
///
/// Every node is yielded at most once and the start node never is, even
/// when a cycle leads back to it. Neighbors are expanded when a node is
/// popped, so a storage failure surfaces at the step that hit it and ends
/// the walk.
pub struct Walk<'g, S, P, F> {
    graph: &'g Graph<S, P>,
    start: NodeId,
    direction: Direction,
    order: Order,
    edge_cond: F,
    frontier: VecDeque<NodeId>,
    visited: BTreeSet<NodeId>,
}

impl<'g, S, P, F> Walk<'g, S, P, F>
where
    S: Storage,
    P: EdgePolicy,
    F: Fn(&Edge) -> bool,
{
    pub(super) fn new(
        graph: &'g Graph<S, P>,
        start: NodeId,
        direction: Direction,
        order: Order,
        edge_cond: F,
    ) -> Self {
        let mut frontier = VecDeque::new();
        frontier.push_back(start.clone());
        let mut visited = BTreeSet::new();
        visited.insert(start.clone());
        Self {
            graph,
            start,
            direction,
            order,
            edge_cond,
            frontier,
            visited,
        }
    }

    fn pop(&mut self) -> Option<NodeId> {
        match self.order {
            Order::BreadthFirst => self.frontier.pop_front(),
            Order::DepthFirst => self.frontier.pop_back(),
        }
    }
}

impl<S, P, F> Iterator for Walk<'_, S, P, F>
where
    S: Storage,
    P: EdgePolicy,
    F: Fn(&Edge) -> bool,
{
    type Item = Result<Node, TesselError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(current) = self.pop() {
            let neighbors = match self
                .graph
                .neighbors(&current, self.direction, &self.edge_cond)
            {
                Ok(neighbors) => neighbors,
                Err(e) => {
                    self.frontier.clear();
                    return Some(Err(e));
                }
            };
            for neighbor in neighbors {
                if self.visited.insert(neighbor.clone()) {
                    self.frontier.push_back(neighbor);
                }
            }
            if current != self.start {
                return Some(Ok(Node::new(current)));
            }
        }
        None
    }
}

impl<S, P, F> std::fmt::Debug for Walk<'_, S, P, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Walk")
            .field("start", &self.start)
            .field("direction", &self.direction)
            .field("order", &self.order)
            .field("frontier", &self.frontier.len())
            .field("visited", &self.visited.len())
            .finish_non_exhaustive()
    }
}
