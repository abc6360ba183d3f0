//! Binary snapshot codec.

use crate::group::merge_meta;
use crate::primitives::{
    MAX_IMPORT_EDGE_COUNT, MAX_IMPORT_NODE_COUNT, MAX_SNAPSHOT_PAYLOAD_SIZE, SNAPSHOT_MAGIC,
    SNAPSHOT_VERSION,
};
use crate::storage::Storage;
use crate::{EdgeId, EntityId, NodeId, PropertyMap, PropertyUpdates, TesselError, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// FORMAT
// =============================================================================

/// Header preceding every snapshot body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// Magic bytes to identify the format.
    pub magic: [u8; 4],

    /// Format version for compatibility.
    pub version: u8,

    /// Number of nodes in the body.
    pub node_count: u64,

    /// Number of edges in the body.
    pub edge_count: u64,

    /// [`snapshot_checksum`] of the encoded body.
    pub checksum: u64,
}

impl SnapshotHeader {
    /// Create a header for the current format version.
    #[must_use]
    pub fn new(node_count: u64, edge_count: u64, checksum: u64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            node_count,
            edge_count,
            checksum,
        }
    }

    /// Check magic, version and size limits.
    ///
    /// # Security Note
    ///
    /// Error messages are intentionally generic to avoid leaking format details
    /// to potential attackers.
    pub fn validate(&self) -> Result<(), TesselError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(TesselError::SerializationError(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != SNAPSHOT_VERSION {
            return Err(TesselError::SerializationError(
                "Unsupported file version".to_string(),
            ));
        }
        if self.node_count > MAX_IMPORT_NODE_COUNT {
            return Err(TesselError::SerializationError(format!(
                "Node count {} exceeds maximum allowed {}",
                self.node_count, MAX_IMPORT_NODE_COUNT
            )));
        }
        if self.edge_count > MAX_IMPORT_EDGE_COUNT {
            return Err(TesselError::SerializationError(format!(
                "Edge count {} exceeds maximum allowed {}",
                self.edge_count, MAX_IMPORT_EDGE_COUNT
            )));
        }
        Ok(())
    }
}

/// A node and its properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotNode {
    pub id: NodeId,
    pub properties: PropertyMap,
}

/// An edge and its properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotEdge {
    pub id: EdgeId,
    pub properties: PropertyMap,
}

/// Snapshot body. Nodes and edges are sorted by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub nodes: Vec<SnapshotNode>,
    pub edges: Vec<SnapshotEdge>,
    pub meta: BTreeMap<String, Value>,
}

/// What an import wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Nodes created.
    pub nodes_created: usize,
    /// Nodes whose properties were updated in place.
    pub nodes_updated: usize,
    /// Edges created.
    pub edges_created: usize,
    /// Edges whose properties were updated in place.
    pub edges_updated: usize,
    /// Edges dropped because an endpoint was missing after filtering.
    pub edges_skipped: usize,
}

/// Deterministic checksum of an encoded snapshot body.
///
/// # Security Note
///
/// This is **NOT** a cryptographic hash. It detects accidental corruption
/// and truncation. Use `snapshot_digest` (feature `crypto-hash`) when
/// tampering matters.
#[must_use]
pub fn snapshot_checksum(body: &[u8]) -> u64 {
    body.iter()
        .fold(body.len() as u64, |hash, byte| {
            (hash.rotate_left(5) ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
        })
}

fn ser_err(context: &str, e: impl std::fmt::Display) -> TesselError {
    TesselError::SerializationError(format!("{context}: {e}"))
}

// =============================================================================
// EXPORT
// =============================================================================

/// Collect the entities of `storage` accepted by `filter`.
///
/// Edges are kept only when both endpoints are kept too. Metadata is always
/// included.
fn collect(
    storage: &dyn Storage,
    filter: &dyn Fn(&EntityId) -> bool,
) -> Result<Snapshot, TesselError> {
    let mut kept = BTreeSet::new();
    let mut nodes = Vec::new();
    for id in storage.node_ids()? {
        if !filter(&EntityId::Node(id.clone())) {
            continue;
        }
        let properties = storage.get_node_properties(&id)?;
        kept.insert(id.clone());
        nodes.push(SnapshotNode { id, properties });
    }

    let mut edges = Vec::new();
    for id in storage.edge_ids()? {
        if !kept.contains(&id.src) || !kept.contains(&id.dst) {
            continue;
        }
        if !filter(&EntityId::Edge(id.clone())) {
            continue;
        }
        let properties = storage.get_edge_properties(&id)?;
        edges.push(SnapshotEdge { id, properties });
    }

    let mut meta = BTreeMap::new();
    for name in storage.meta_names()? {
        if let Some(value) = storage.get_meta(&name)? {
            meta.insert(name, value);
        }
    }

    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    edges.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Snapshot { nodes, edges, meta })
}

/// Export the entities of `storage` accepted by `filter`.
///
/// Format:
/// ```text
/// [header_len: u32 LE] [SnapshotHeader (postcard)] [Snapshot (postcard)]
/// ```
pub fn export_snapshot(
    storage: &dyn Storage,
    filter: &dyn Fn(&EntityId) -> bool,
) -> Result<Vec<u8>, TesselError> {
    let snapshot = collect(storage, filter)?;

    let body = postcard::to_allocvec(&snapshot).map_err(|e| ser_err("Data", e))?;
    let header = SnapshotHeader::new(
        snapshot.nodes.len() as u64,
        snapshot.edges.len() as u64,
        snapshot_checksum(&body),
    );
    let header_bytes = postcard::to_allocvec(&header).map_err(|e| ser_err("Header", e))?;
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| TesselError::SerializationError("Header too large".to_string()))?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + body.len());
    result.extend_from_slice(&header_len.to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&body);

    tracing::debug!(
        nodes = header.node_count,
        edges = header.edge_count,
        bytes = result.len(),
        "snapshot exported"
    );
    Ok(result)
}

// =============================================================================
// IMPORT
// =============================================================================

/// Decode and fully validate a snapshot without touching any storage.
pub fn read_snapshot(data: &[u8]) -> Result<Snapshot, TesselError> {
    if data.len() > MAX_SNAPSHOT_PAYLOAD_SIZE {
        return Err(TesselError::SerializationError(format!(
            "Payload size {} exceeds maximum allowed {}",
            data.len(),
            MAX_SNAPSHOT_PAYLOAD_SIZE
        )));
    }
    let (len_bytes, rest) = data
        .split_first_chunk::<4>()
        .ok_or_else(|| TesselError::SerializationError("Data too short".to_string()))?;
    let header_len = u32::from_le_bytes(*len_bytes) as usize;
    if rest.len() < header_len {
        return Err(TesselError::SerializationError(
            "Data too short for header".to_string(),
        ));
    }
    let (header_bytes, body) = rest.split_at(header_len);

    let header: SnapshotHeader =
        postcard::from_bytes(header_bytes).map_err(|e| ser_err("Header", e))?;
    header.validate()?;

    // Checksum before decoding so corrupt bytes never reach the decoder.
    let computed = snapshot_checksum(body);
    if computed != header.checksum {
        return Err(TesselError::SerializationError(format!(
            "Checksum mismatch: expected {}, got {}",
            header.checksum, computed
        )));
    }

    let snapshot: Snapshot = postcard::from_bytes(body).map_err(|e| ser_err("Data", e))?;
    if snapshot.nodes.len() as u64 != header.node_count {
        return Err(TesselError::SerializationError(
            "Node count mismatch".to_string(),
        ));
    }
    if snapshot.edges.len() as u64 != header.edge_count {
        return Err(TesselError::SerializationError(
            "Edge count mismatch".to_string(),
        ));
    }
    Ok(snapshot)
}

fn as_updates(properties: PropertyMap) -> PropertyUpdates {
    properties
        .into_iter()
        .map(|(name, value)| (name, Some(value)))
        .collect()
}

/// Import the entities of a snapshot accepted by `filter` into `storage`.
///
/// The whole snapshot is validated first. Existing ids get the snapshot's
/// properties upserted; properties absent from the snapshot are kept.
/// Group counters and registries are merged rather than replaced.
pub fn import_snapshot(
    storage: &mut dyn Storage,
    data: &[u8],
    filter: &dyn Fn(&EntityId) -> bool,
) -> Result<ImportSummary, TesselError> {
    let snapshot = read_snapshot(data)?;
    let mut summary = ImportSummary::default();

    for node in snapshot.nodes {
        if !filter(&EntityId::Node(node.id.clone())) {
            continue;
        }
        if storage.contains_node(&node.id)? {
            storage.set_node_properties(&node.id, as_updates(node.properties))?;
            summary.nodes_updated += 1;
        } else {
            storage.add_node(&node.id, node.properties)?;
            summary.nodes_created += 1;
        }
    }

    for edge in snapshot.edges {
        if !filter(&EntityId::Edge(edge.id.clone())) {
            continue;
        }
        if storage.contains_edge(&edge.id)? {
            storage.set_edge_properties(&edge.id, as_updates(edge.properties))?;
            summary.edges_updated += 1;
        } else if storage.contains_node(&edge.id.src)? && storage.contains_node(&edge.id.dst)? {
            storage.add_edge(&edge.id, edge.properties)?;
            summary.edges_created += 1;
        } else {
            summary.edges_skipped += 1;
        }
    }

    for (name, value) in snapshot.meta {
        let merged = merge_meta(&name, storage.get_meta(&name)?, value);
        storage.set_meta(&name, Some(merged))?;
    }

    tracing::debug!(?summary, "snapshot imported");
    Ok(summary)
}

// =============================================================================
// CRYPTOGRAPHIC HASH SUPPORT
// =============================================================================

/// BLAKE3 hex digest (64 characters) of snapshot bytes.
///
/// # Requires
///
/// This function is only available with the `crypto-hash` feature enabled.
#[cfg(feature = "crypto-hash")]
#[must_use]
pub fn snapshot_digest(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NativeStorage;

    fn accept_all(_: &EntityId) -> bool {
        true
    }

    fn sample() -> NativeStorage {
        let mut storage = NativeStorage::new();
        for name in ["a", "b", "c"] {
            let mut props = PropertyMap::new();
            props.insert("name".into(), Value::from(name));
            storage
                .add_node(&NodeId::new(name), props)
                .expect("node");
        }
        let mut props = PropertyMap::new();
        props.insert("weight".into(), Value::from(2i64));
        storage
            .add_edge(&EdgeId::new("a", "b", "g:t"), props)
            .expect("edge");
        storage
            .add_edge(&EdgeId::new("b", "c", "g:t"), PropertyMap::new())
            .expect("edge");
        storage
            .set_meta("g@user_cnt", Some(Value::from(7i64)))
            .expect("meta");
        storage
    }

    #[test]
    fn header_validation() {
        let header = SnapshotHeader::new(0, 0, 0);
        assert!(header.validate().is_ok());

        let mut bad = header.clone();
        bad.magic = *b"NOPE";
        assert!(bad.validate().is_err());

        let mut bad = header.clone();
        bad.version = 99;
        assert!(bad.validate().is_err());

        let mut bad = header;
        bad.node_count = MAX_IMPORT_NODE_COUNT + 1;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn export_is_deterministic() {
        let storage = sample();
        let first = export_snapshot(&storage, &accept_all).expect("export");
        let second = export_snapshot(&storage, &accept_all).expect("export");
        assert_eq!(first, second);
    }

    #[test]
    fn full_transfer_preserves_everything() {
        let source = sample();
        let data = export_snapshot(&source, &accept_all).expect("export");

        let mut target = NativeStorage::new();
        let summary = import_snapshot(&mut target, &data, &accept_all).expect("import");

        assert_eq!(summary.nodes_created, 3);
        assert_eq!(summary.edges_created, 2);
        assert_eq!(target.node_ids().expect("ids"), source.node_ids().expect("ids"));
        assert_eq!(
            target
                .get_edge_property(&EdgeId::new("a", "b", "g:t"), "weight")
                .expect("get"),
            Some(Value::from(2i64))
        );
        assert_eq!(
            target.get_meta("g@user_cnt").expect("meta"),
            Some(Value::from(7i64))
        );
    }

    #[test]
    fn export_filter_drops_dangling_edges() {
        let storage = sample();
        let data = export_snapshot(&storage, &|id: &EntityId| match id {
            EntityId::Node(node) => node.as_str() != "c",
            EntityId::Edge(_) => true,
        })
        .expect("export");

        let snapshot = read_snapshot(&data).expect("read");
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.edges.len(), 1);
        assert_eq!(snapshot.edges[0].id, EdgeId::new("a", "b", "g:t"));
    }

    #[test]
    fn import_updates_existing_ids() {
        let data = export_snapshot(&sample(), &accept_all).expect("export");

        let mut target = NativeStorage::new();
        let mut props = PropertyMap::new();
        props.insert("name".into(), Value::from("old"));
        props.insert("local".into(), Value::from(true));
        target
            .add_node(&NodeId::new("a"), props)
            .expect("existing");

        let summary = import_snapshot(&mut target, &data, &accept_all).expect("import");
        assert_eq!(summary.nodes_updated, 1);
        assert_eq!(summary.nodes_created, 2);

        let merged = target
            .get_node_properties(&NodeId::new("a"))
            .expect("props");
        assert_eq!(merged.get("name"), Some(&Value::from("a")));
        assert_eq!(merged.get("local"), Some(&Value::from(true)));
    }

    #[test]
    fn import_filter_skips_edges_without_endpoints() {
        let data = export_snapshot(&sample(), &accept_all).expect("export");
        let mut target = NativeStorage::new();

        let summary = import_snapshot(&mut target, &data, &|id: &EntityId| match id {
            EntityId::Node(node) => node.as_str() != "a",
            EntityId::Edge(_) => true,
        })
        .expect("import");

        assert_eq!(summary.nodes_created, 2);
        assert_eq!(summary.edges_created, 1);
        assert_eq!(summary.edges_skipped, 1);
    }

    #[test]
    fn import_never_lowers_group_counters() {
        use crate::graph::Graph;
        use crate::group::GroupedNodes;

        let mut older: Graph<NativeStorage> =
            Graph::new(NativeStorage::new(), "g").expect("graph");
        older.register_group("user").expect("register");
        older.add_group_node("user", None).expect("alloc");
        let data = export_snapshot(older.storage(), &accept_all).expect("export");

        let mut graph: Graph<NativeStorage> =
            Graph::new(NativeStorage::new(), "g").expect("graph");
        graph.register_group("user").expect("register");
        graph.register_group("admin").expect("register");
        for _ in 0..3 {
            graph.add_group_node("user", None).expect("alloc");
        }
        graph.del_node(&NodeId::new("g@user#3")).expect("delete");

        import_snapshot(graph.storage_mut(), &data, &accept_all).expect("import");
        graph.refresh_cache().expect("refresh");

        assert_eq!(graph.group_counter("user").expect("counter"), Some(3));
        assert_eq!(graph.groups().expect("groups"), vec!["user", "admin"]);
        let next = graph.add_group_node("user", None).expect("alloc");
        assert_eq!(next.id().as_str(), "g@user#4");
        assert!(graph.add_group_node("admin", None).is_ok());
    }

    #[test]
    fn import_raises_lower_counters_and_adds_groups() {
        let data = export_snapshot(&sample(), &accept_all).expect("export");

        let mut target = NativeStorage::new();
        target
            .set_meta("g@user_cnt", Some(Value::from(2i64)))
            .expect("meta");
        target
            .set_meta("g@__groups", Some(Value::List(vec![Value::from("team")])))
            .expect("meta");
        target
            .set_meta("plain", Some(Value::from("old")))
            .expect("meta");

        let mut source = sample();
        source
            .set_meta("g@__groups", Some(Value::List(vec![Value::from("user")])))
            .expect("meta");
        source
            .set_meta("plain", Some(Value::from("new")))
            .expect("meta");
        let with_registry = export_snapshot(&source, &accept_all).expect("export");

        import_snapshot(&mut target, &data, &accept_all).expect("import");
        import_snapshot(&mut target, &with_registry, &accept_all).expect("import");

        assert_eq!(
            target.get_meta("g@user_cnt").expect("meta"),
            Some(Value::from(7i64))
        );
        assert_eq!(
            target.get_meta("g@__groups").expect("meta"),
            Some(Value::List(vec![Value::from("team"), Value::from("user")]))
        );
        assert_eq!(
            target.get_meta("plain").expect("meta"),
            Some(Value::from("new"))
        );
    }

    #[test]
    fn corrupted_body_rejected_before_writing() {
        let mut data = export_snapshot(&sample(), &accept_all).expect("export");
        let last = data.len() - 1;
        data[last] ^= 0xff;

        let mut target = NativeStorage::new();
        let result = import_snapshot(&mut target, &data, &accept_all);
        assert!(matches!(result, Err(TesselError::SerializationError(_))));
        assert_eq!(target.node_count().expect("count"), 0);
    }

    #[test]
    fn truncated_data_rejected() {
        assert!(read_snapshot(&[]).is_err());
        assert!(read_snapshot(&[200, 0, 0, 0, 1]).is_err());
    }

    #[cfg(feature = "crypto-hash")]
    #[test]
    fn digest_is_stable_hex() {
        let data = export_snapshot(&sample(), &accept_all).expect("export");
        let digest = snapshot_digest(&data);
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, snapshot_digest(&data));
    }
}
