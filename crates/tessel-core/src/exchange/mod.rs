//! # Exchange
//!
//! Moving graph data in and out of any [`Storage`](crate::storage::Storage).
//!
//! The binary snapshot is the only bundled format:
//!
//! ```text
//! [header_len: u32 LE] [SnapshotHeader (postcard)] [Snapshot (postcard)]
//! ```
//!
//! Exports are deterministic: the same storage contents always produce the
//! same bytes. Imports are validated completely before the destination is
//! touched, and an id that already exists there gets its properties updated
//! instead of failing.

mod snapshot;

pub use snapshot::{
    ImportSummary, Snapshot, SnapshotEdge, SnapshotHeader, SnapshotNode, export_snapshot,
    import_snapshot, read_snapshot, snapshot_checksum,
};

#[cfg(feature = "crypto-hash")]
pub use snapshot::snapshot_digest;
