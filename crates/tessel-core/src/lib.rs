//! # tessel-core
//!
//! An embeddable property-graph storage engine.
//!
//! Nodes and directed, typed edges each carry a name → value property set.
//! Everything is layered over one storage contract:
//!
//! - `storage`: the [`Storage`] trait plus in-memory, thread-safe, overlay
//!   and redb-backed implementations
//! - `graph`: the cache-synchronized [`Graph`] facade with traversal and
//!   single/multi-edge policies
//! - `entity`: [`Node`] / [`Edge`] handles reading and writing properties
//!   through an explicit storage handle
//! - `group`: grouped node ids with monotonic per-group counters
//! - `exchange`: deterministic binary snapshots of any storage
//!
//! ## Constraints
//!
//! - Synchronous only: no async runtime, no network access
//! - Deterministic: every listing is ordered (`BTreeMap` / `BTreeSet`)
//! - Every failure is a [`TesselError`] returned to the immediate caller

// =============================================================================
// MODULES
// =============================================================================

pub mod entity;
pub mod exchange;
pub mod graph;
pub mod group;
pub mod primitives;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{EdgeId, EntityId, NodeId, PropertyMap, PropertyUpdates, TesselError, Value};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use entity::{Edge, Entity, NamedVariant, Node};
pub use exchange::{ImportSummary, export_snapshot, import_snapshot, read_snapshot};
pub use graph::{EdgePolicy, Graph, MultiEdge, SingleEdge, Walk};
pub use group::{GroupedNodes, group_name_of};
pub use storage::{ConcurrentStorage, DeltaStorage, NativeStorage, RedbStorage, Storage};

#[cfg(feature = "crypto-hash")]
pub use exchange::snapshot_digest;
