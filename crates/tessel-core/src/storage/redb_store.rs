//! # redb-backed Storage
//!
//! A disk-backed storage using the redb embedded database.
//!
//! Every mutation runs in one write transaction, so a node and its cascaded
//! edges disappear together, and a crash never leaves an edge without its
//! adjacency index entry.
//!
//! ## Layout
//!
//! | Table      | Key                  | Value                       |
//! |------------|----------------------|-----------------------------|
//! | `nodes`    | node id              | postcard `PropertyMap`      |
//! | `edges`    | `(src, dst, type)`   | postcard `PropertyMap`      |
//! | `incoming` | `(dst, src, type)`   | `()`                        |
//! | `metadata` | slot name            | postcard `Value`            |
//!
//! Outgoing edges are a prefix range over `edges`; incoming edges a prefix
//! range over `incoming`.

use super::{Storage, ensure_open};
use crate::{EdgeId, NodeId, PropertyMap, PropertyUpdates, TesselError, Value};
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::path::Path;

const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

const EDGES: TableDefinition<(&str, &str, &str), &[u8]> = TableDefinition::new("edges");

/// Reverse adjacency index: `(dst, src, type)`.
const INCOMING: TableDefinition<(&str, &str, &str), ()> = TableDefinition::new("incoming");

const METADATA: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

fn io_err(e: impl Display) -> TesselError {
    TesselError::IoError(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, TesselError> {
    postcard::to_allocvec(value).map_err(|e| TesselError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TesselError> {
    postcard::from_bytes(bytes).map_err(|e| TesselError::SerializationError(e.to_string()))
}

fn edge_key(id: &EdgeId) -> (&str, &str, &str) {
    (id.src.as_str(), id.dst.as_str(), id.edge_type.as_str())
}

fn incoming_key(id: &EdgeId) -> (&str, &str, &str) {
    (id.dst.as_str(), id.src.as_str(), id.edge_type.as_str())
}

/// A disk-backed storage using redb.
pub struct RedbStorage {
    db: Database,
    closed: bool,
}

impl std::fmt::Debug for RedbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStorage")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl RedbStorage {
    /// Open or create a storage database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TesselError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(NODES).map_err(io_err)?;
            let _ = write_txn.open_table(EDGES).map_err(io_err)?;
            let _ = write_txn.open_table(INCOMING).map_err(io_err)?;
            let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        tracing::debug!(path = %path.as_ref().display(), "redb storage opened");
        Ok(Self { db, closed: false })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), TesselError> {
        ensure_open(self.closed)?;
        self.db.compact().map_err(io_err)?;
        Ok(())
    }

    fn read_txn(&self) -> Result<ReadTransaction, TesselError> {
        ensure_open(self.closed)?;
        self.db.begin_read().map_err(io_err)
    }

    /// Run `body` in a write transaction, committing only if it succeeds.
    fn write<R>(
        &self,
        body: impl FnOnce(&WriteTransaction) -> Result<R, TesselError>,
    ) -> Result<R, TesselError> {
        ensure_open(self.closed)?;
        let write_txn = self.db.begin_write().map_err(io_err)?;
        let out = body(&write_txn)?;
        write_txn.commit().map_err(io_err)?;
        Ok(out)
    }

    fn node_row(&self, id: &NodeId) -> Result<Option<PropertyMap>, TesselError> {
        let read_txn = self.read_txn()?;
        let table = read_txn.open_table(NODES).map_err(io_err)?;
        let row = table.get(id.as_str()).map_err(io_err)?;
        row.map(|bytes| decode(bytes.value())).transpose()
    }

    fn edge_row(&self, id: &EdgeId) -> Result<Option<PropertyMap>, TesselError> {
        let read_txn = self.read_txn()?;
        let table = read_txn.open_table(EDGES).map_err(io_err)?;
        let row = table.get(edge_key(id)).map_err(io_err)?;
        row.map(|bytes| decode(bytes.value())).transpose()
    }

    fn require_node(&self, id: &NodeId) -> Result<(), TesselError> {
        if self.contains_node(id)? {
            Ok(())
        } else {
            Err(TesselError::node_not_exist(id))
        }
    }

    fn store_edge(&self, id: &EdgeId, properties: &PropertyMap) -> Result<(), TesselError> {
        let bytes = encode(properties)?;
        self.write(|txn| {
            let mut edges = txn.open_table(EDGES).map_err(io_err)?;
            edges
                .insert(edge_key(id), bytes.as_slice())
                .map_err(io_err)?;
            let mut incoming = txn.open_table(INCOMING).map_err(io_err)?;
            incoming.insert(incoming_key(id), ()).map_err(io_err)?;
            Ok(())
        })
    }

    fn store_node(&self, id: &NodeId, properties: &PropertyMap) -> Result<(), TesselError> {
        let bytes = encode(properties)?;
        self.write(|txn| {
            let mut nodes = txn.open_table(NODES).map_err(io_err)?;
            nodes.insert(id.as_str(), bytes.as_slice()).map_err(io_err)?;
            Ok(())
        })
    }
}

impl Storage for RedbStorage {
    fn is_closed(&self) -> bool {
        self.closed
    }

    fn contains_node(&self, id: &NodeId) -> Result<bool, TesselError> {
        let read_txn = self.read_txn()?;
        let table = read_txn.open_table(NODES).map_err(io_err)?;
        Ok(table.get(id.as_str()).map_err(io_err)?.is_some())
    }

    fn contains_edge(&self, id: &EdgeId) -> Result<bool, TesselError> {
        let read_txn = self.read_txn()?;
        let table = read_txn.open_table(EDGES).map_err(io_err)?;
        Ok(table.get(edge_key(id)).map_err(io_err)?.is_some())
    }

    fn node_ids(&self) -> Result<Vec<NodeId>, TesselError> {
        let read_txn = self.read_txn()?;
        let table = read_txn.open_table(NODES).map_err(io_err)?;

        let mut ids = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (key, _) = entry.map_err(io_err)?;
            ids.push(NodeId::new(key.value()));
        }
        Ok(ids)
    }

    fn edge_ids(&self) -> Result<Vec<EdgeId>, TesselError> {
        let read_txn = self.read_txn()?;
        let table = read_txn.open_table(EDGES).map_err(io_err)?;

        let mut ids = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (key, _) = entry.map_err(io_err)?;
            let (src, dst, edge_type) = key.value();
            ids.push(EdgeId::new(src, dst, edge_type));
        }
        Ok(ids)
    }

    fn add_node(&mut self, id: &NodeId, properties: PropertyMap) -> Result<(), TesselError> {
        if self.contains_node(id)? {
            return Err(TesselError::node_exists(id));
        }
        self.store_node(id, &properties)
    }

    fn add_edge(&mut self, id: &EdgeId, properties: PropertyMap) -> Result<(), TesselError> {
        if self.contains_edge(id)? {
            return Err(TesselError::edge_exists(id));
        }
        self.require_node(&id.src)?;
        self.require_node(&id.dst)?;
        self.store_edge(id, &properties)
    }

    fn get_node_properties(&self, id: &NodeId) -> Result<PropertyMap, TesselError> {
        self.node_row(id)?
            .ok_or_else(|| TesselError::node_not_exist(id))
    }

    fn get_edge_properties(&self, id: &EdgeId) -> Result<PropertyMap, TesselError> {
        self.edge_row(id)?
            .ok_or_else(|| TesselError::edge_not_exist(id))
    }

    fn set_node_properties(
        &mut self,
        id: &NodeId,
        updates: PropertyUpdates,
    ) -> Result<(), TesselError> {
        let mut properties = self.get_node_properties(id)?;
        super::apply_updates(&mut properties, updates);
        self.store_node(id, &properties)
    }

    fn set_edge_properties(
        &mut self,
        id: &EdgeId,
        updates: PropertyUpdates,
    ) -> Result<(), TesselError> {
        let mut properties = self.get_edge_properties(id)?;
        super::apply_updates(&mut properties, updates);
        self.store_edge(id, &properties)
    }

    fn delete_node(&mut self, id: &NodeId) -> Result<(), TesselError> {
        self.require_node(id)?;
        let mut incident = self.get_outgoing_edges(id)?;
        incident.extend(self.get_incoming_edges(id)?);

        self.write(|txn| {
            let mut edges = txn.open_table(EDGES).map_err(io_err)?;
            let mut incoming = txn.open_table(INCOMING).map_err(io_err)?;
            for edge in &incident {
                edges.remove(edge_key(edge)).map_err(io_err)?;
                incoming.remove(incoming_key(edge)).map_err(io_err)?;
            }
            let mut nodes = txn.open_table(NODES).map_err(io_err)?;
            nodes.remove(id.as_str()).map_err(io_err)?;
            Ok(())
        })?;

        tracing::debug!(node = %id, cascaded = incident.len(), "node deleted");
        Ok(())
    }

    fn delete_edge(&mut self, id: &EdgeId) -> Result<(), TesselError> {
        if !self.contains_edge(id)? {
            return Err(TesselError::edge_not_exist(id));
        }
        self.write(|txn| {
            let mut edges = txn.open_table(EDGES).map_err(io_err)?;
            edges.remove(edge_key(id)).map_err(io_err)?;
            let mut incoming = txn.open_table(INCOMING).map_err(io_err)?;
            incoming.remove(incoming_key(id)).map_err(io_err)?;
            Ok(())
        })
    }

    fn get_incoming_edges(&self, id: &NodeId) -> Result<BTreeSet<EdgeId>, TesselError> {
        self.require_node(id)?;
        let read_txn = self.read_txn()?;
        let table = read_txn.open_table(INCOMING).map_err(io_err)?;

        let mut result = BTreeSet::new();
        for entry in table.range((id.as_str(), "", "")..).map_err(io_err)? {
            let (key, _) = entry.map_err(io_err)?;
            let (dst, src, edge_type) = key.value();
            if dst != id.as_str() {
                break;
            }
            result.insert(EdgeId::new(src, dst, edge_type));
        }
        Ok(result)
    }

    fn get_outgoing_edges(&self, id: &NodeId) -> Result<BTreeSet<EdgeId>, TesselError> {
        self.require_node(id)?;
        let read_txn = self.read_txn()?;
        let table = read_txn.open_table(EDGES).map_err(io_err)?;

        let mut result = BTreeSet::new();
        for entry in table.range((id.as_str(), "", "")..).map_err(io_err)? {
            let (key, _) = entry.map_err(io_err)?;
            let (src, dst, edge_type) = key.value();
            if src != id.as_str() {
                break;
            }
            result.insert(EdgeId::new(src, dst, edge_type));
        }
        Ok(result)
    }

    fn get_meta(&self, name: &str) -> Result<Option<Value>, TesselError> {
        let read_txn = self.read_txn()?;
        let table = read_txn.open_table(METADATA).map_err(io_err)?;
        let row = table.get(name).map_err(io_err)?;
        row.map(|bytes| decode(bytes.value())).transpose()
    }

    fn meta_names(&self) -> Result<Vec<String>, TesselError> {
        let read_txn = self.read_txn()?;
        let table = read_txn.open_table(METADATA).map_err(io_err)?;

        let mut names = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (key, _) = entry.map_err(io_err)?;
            names.push(key.value().to_string());
        }
        Ok(names)
    }

    fn set_meta(&mut self, name: &str, value: Option<Value>) -> Result<(), TesselError> {
        let bytes = value.as_ref().map(encode).transpose()?;
        self.write(|txn| {
            let mut table = txn.open_table(METADATA).map_err(io_err)?;
            match &bytes {
                Some(bytes) => {
                    table.insert(name, bytes.as_slice()).map_err(io_err)?;
                }
                None => {
                    table.remove(name).map_err(io_err)?;
                }
            }
            Ok(())
        })
    }

    fn node_count(&self) -> Result<usize, TesselError> {
        let read_txn = self.read_txn()?;
        let table = read_txn.open_table(NODES).map_err(io_err)?;
        let count = table.len().map_err(io_err)?;
        Ok(count as usize)
    }

    fn edge_count(&self) -> Result<usize, TesselError> {
        let read_txn = self.read_txn()?;
        let table = read_txn.open_table(EDGES).map_err(io_err)?;
        let count = table.len().map_err(io_err)?;
        Ok(count as usize)
    }

    fn clear(&mut self) -> Result<bool, TesselError> {
        self.write(|txn| {
            let mut had_data = false;
            had_data |= !txn.open_table(NODES).map_err(io_err)?.is_empty().map_err(io_err)?;
            had_data |= !txn.open_table(EDGES).map_err(io_err)?.is_empty().map_err(io_err)?;
            had_data |= !txn
                .open_table(METADATA)
                .map_err(io_err)?
                .is_empty()
                .map_err(io_err)?;

            txn.delete_table(NODES).map_err(io_err)?;
            txn.delete_table(EDGES).map_err(io_err)?;
            txn.delete_table(INCOMING).map_err(io_err)?;
            txn.delete_table(METADATA).map_err(io_err)?;

            // Recreate so later read transactions find the tables.
            let _ = txn.open_table(NODES).map_err(io_err)?;
            let _ = txn.open_table(EDGES).map_err(io_err)?;
            let _ = txn.open_table(INCOMING).map_err(io_err)?;
            let _ = txn.open_table(METADATA).map_err(io_err)?;
            Ok(had_data)
        })
    }

    /// Mark the handle closed. The database file keeps its contents so a
    /// later `open` sees them again.
    fn close(&mut self) -> Result<(), TesselError> {
        ensure_open(self.closed)?;
        self.closed = true;
        tracing::debug!("redb storage closed");
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
