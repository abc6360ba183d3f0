//! # Grouped Nodes
//!
//! Allocation of node ids of the form `"<graph>@<group>#<suffix>"`.
//!
//! Each registered group owns a counter. Calling `add_group_node` without an
//! explicit suffix issues the next counter value; counters only ever grow, so
//! a suffix is never handed out twice even after its node is deleted.
//!
//! ## Metadata layout
//!
//! - `"<graph>@<group>_cnt"`: highest suffix issued (`Value::Int`)
//! - `"<graph>@__groups"`: registered group names (`Value::List` of `Str`)
//!
//! `<graph>` is the graph name with every `@` removed. The backend metadata
//! is authoritative; the facade only caches it.

use crate::entity::Node;
use crate::graph::{EdgePolicy, Graph};
use crate::primitives::{
    GROUP_COUNTER_SUFFIX, GROUP_REGISTRY_SUFFIX, GROUP_SEPARATOR, SUFFIX_SEPARATOR,
};
use crate::storage::Storage;
use crate::{NodeId, TesselError, Value};
use std::collections::BTreeMap;

// =============================================================================
// NAMING
// =============================================================================

/// The graph-name part of grouped ids and metadata keys.
pub(crate) fn group_prefix(graph_name: &str) -> String {
    graph_name.replace(GROUP_SEPARATOR, "")
}

fn counter_key(prefix: &str, group: &str) -> String {
    format!("{prefix}{GROUP_SEPARATOR}{group}{GROUP_COUNTER_SUFFIX}")
}

fn registry_key(prefix: &str) -> String {
    format!("{prefix}{GROUP_SEPARATOR}{GROUP_REGISTRY_SUFFIX}")
}

fn grouped_id(prefix: &str, group: &str, suffix: &str) -> NodeId {
    NodeId::new(format!(
        "{prefix}{GROUP_SEPARATOR}{group}{SUFFIX_SEPARATOR}{suffix}"
    ))
}

fn validate_group(group: &str) -> Result<(), TesselError> {
    if group.is_empty() || group.contains(GROUP_SEPARATOR) || group.contains(SUFFIX_SEPARATOR) {
        return Err(TesselError::IllegalArgument(format!(
            "invalid group name '{group}'"
        )));
    }
    Ok(())
}

fn validate_suffix(suffix: &str) -> Result<(), TesselError> {
    if suffix.is_empty() || suffix.contains(SUFFIX_SEPARATOR) {
        return Err(TesselError::IllegalArgument(format!(
            "invalid group suffix '{suffix}'"
        )));
    }
    Ok(())
}

/// The group part of a grouped node id.
///
/// That is the text strictly between the first `@` and the last `#`, when
/// `@` comes first and the text is non-empty.
#[must_use]
pub fn group_name_of(id: &NodeId) -> Option<&str> {
    let raw = id.as_str();
    let at = raw.find(GROUP_SEPARATOR)?;
    let hash = raw.rfind(SUFFIX_SEPARATOR)?;
    if at >= hash {
        return None;
    }
    let group = &raw[at + GROUP_SEPARATOR.len_utf8()..hash];
    (!group.is_empty()).then_some(group)
}

fn decode_counter(key: &str, value: Value) -> Result<u64, TesselError> {
    value
        .as_int()
        .and_then(|count| u64::try_from(count).ok())
        .ok_or_else(|| {
            TesselError::SerializationError(format!("metadata {key} is not a group counter"))
        })
}

fn decode_registry(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::List(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Str(name) => Some(name),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Read every registered group counter for `prefix` from metadata.
pub(crate) fn load_counters(
    storage: &dyn Storage,
    prefix: &str,
) -> Result<BTreeMap<String, u64>, TesselError> {
    let mut counters = BTreeMap::new();
    for group in decode_registry(storage.get_meta(&registry_key(prefix))?) {
        let key = counter_key(prefix, &group);
        if let Some(value) = storage.get_meta(&key)? {
            counters.insert(group, decode_counter(&key, value)?);
        }
    }
    Ok(counters)
}

/// Combine an incoming metadata slot with the stored one.
///
/// Group counters keep the larger value and group registries are unioned,
/// so bringing in older data never lowers a counter or drops a group. Any
/// other slot takes the incoming value.
pub(crate) fn merge_meta(key: &str, stored: Option<Value>, incoming: Value) -> Value {
    let Some(stored) = stored else {
        return incoming;
    };
    if !key.contains(GROUP_SEPARATOR) {
        return incoming;
    }

    if key.ends_with(&format!("{GROUP_SEPARATOR}{GROUP_REGISTRY_SUFFIX}")) {
        let mut groups = decode_registry(Some(stored));
        for group in decode_registry(Some(incoming)) {
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        return Value::List(groups.into_iter().map(Value::Str).collect());
    }

    match (stored.as_int(), incoming.as_int()) {
        (Some(old), Some(new)) if key.ends_with(GROUP_COUNTER_SUFFIX) => Value::Int(old.max(new)),
        _ => incoming,
    }
}

// =============================================================================
// GROUPED NODES TRAIT
// =============================================================================

/// Grouped-node allocation over a handful of hooks.
pub trait GroupedNodes {
    /// Graph-name part of ids and metadata keys (no `@`).
    fn group_prefix(&self) -> String;

    /// Read a metadata slot from the backend.
    fn read_meta(&self, key: &str) -> Result<Option<Value>, TesselError>;

    /// Write a metadata slot to the backend.
    fn write_meta(&mut self, key: &str, value: Value) -> Result<(), TesselError>;

    /// Whether a node id is taken in the backend.
    fn node_id_taken(&self, id: &NodeId) -> Result<bool, TesselError>;

    /// Create a node through the owner's normal node path.
    fn create_node(&mut self, id: NodeId) -> Result<Node, TesselError>;

    /// Cached counter value, if any.
    fn cached_counter(&self, group: &str) -> Option<u64>;

    /// Update the counter cache.
    fn cache_counter(&mut self, group: &str, value: u64);

    // -------------------------------------------------------------------------
    // Provided operations
    // -------------------------------------------------------------------------

    /// Registered group names, in registration order.
    fn groups(&self) -> Result<Vec<String>, TesselError> {
        Ok(decode_registry(
            self.read_meta(&registry_key(&self.group_prefix()))?,
        ))
    }

    /// Highest suffix issued for `group`, `None` if it was never registered.
    fn group_counter(&self, group: &str) -> Result<Option<u64>, TesselError> {
        if let Some(cached) = self.cached_counter(group) {
            return Ok(Some(cached));
        }
        let key = counter_key(&self.group_prefix(), group);
        self.read_meta(&key)?
            .map(|value| decode_counter(&key, value))
            .transpose()
    }

    /// Register `group`, seeding its counter with 0. An existing counter is
    /// kept as is.
    fn register_group(&mut self, group: &str) -> Result<(), TesselError> {
        validate_group(group)?;
        let prefix = self.group_prefix();

        let mut groups = self.groups()?;
        if !groups.iter().any(|known| known == group) {
            groups.push(group.to_string());
            let registry = Value::List(groups.into_iter().map(Value::Str).collect());
            self.write_meta(&registry_key(&prefix), registry)?;
        }

        let key = counter_key(&prefix, group);
        let counter = match self.read_meta(&key)? {
            Some(value) => decode_counter(&key, value)?,
            None => {
                self.write_meta(&key, Value::Int(0))?;
                0
            }
        };
        self.cache_counter(group, counter);
        tracing::debug!(group, counter, "group registered");
        Ok(())
    }

    /// Create a node in `group`.
    ///
    /// With a suffix the id is `<graph>@<group>#<suffix>` and the counter is
    /// left alone. Without one the counter advances past every id already
    /// taken, and the new value is persisted.
    fn add_group_node(&mut self, group: &str, suffix: Option<&str>) -> Result<Node, TesselError> {
        validate_group(group)?;
        if !self.groups()?.iter().any(|known| known == group) {
            return Err(TesselError::IllegalArgument(format!(
                "group '{group}' is not registered"
            )));
        }
        let prefix = self.group_prefix();

        if let Some(suffix) = suffix {
            validate_suffix(suffix)?;
            return self.create_node(grouped_id(&prefix, group, suffix));
        }

        let key = counter_key(&prefix, group);
        let stored = match self.read_meta(&key)? {
            Some(value) => decode_counter(&key, value)?,
            None => 0,
        };
        let mut counter = stored.max(self.cached_counter(group).unwrap_or(0));
        let id = loop {
            counter = counter.checked_add(1).ok_or_else(|| {
                TesselError::IllegalArgument(format!("group '{group}' counter exhausted"))
            })?;
            let candidate = grouped_id(&prefix, group, &counter.to_string());
            if !self.node_id_taken(&candidate)? {
                break candidate;
            }
        };

        let node = self.create_node(id)?;
        let persisted = i64::try_from(counter).map_err(|_| {
            TesselError::IllegalArgument(format!("group '{group}' counter exhausted"))
        })?;
        self.write_meta(&key, Value::Int(persisted))?;
        self.cache_counter(group, counter);
        tracing::debug!(group, counter, node = %node.id(), "group node allocated");
        Ok(node)
    }

    /// Create a node in the same group as `like`.
    fn add_group_node_like(
        &mut self,
        like: &NodeId,
        suffix: Option<&str>,
    ) -> Result<Node, TesselError> {
        let group = group_name_of(like)
            .ok_or_else(|| {
                TesselError::IllegalArgument(format!("'{like}' is not a grouped node id"))
            })?
            .to_string();
        self.add_group_node(&group, suffix)
    }

    /// The group part of `id`, see [`group_name_of`].
    fn get_group_name<'a>(&self, id: &'a NodeId) -> Option<&'a str> {
        group_name_of(id)
    }
}

impl<S: Storage, P: EdgePolicy> GroupedNodes for Graph<S, P> {
    fn group_prefix(&self) -> String {
        group_prefix(self.name())
    }

    fn read_meta(&self, key: &str) -> Result<Option<Value>, TesselError> {
        self.storage().get_meta(key)
    }

    fn write_meta(&mut self, key: &str, value: Value) -> Result<(), TesselError> {
        self.storage_mut().set_meta(key, Some(value))
    }

    fn node_id_taken(&self, id: &NodeId) -> Result<bool, TesselError> {
        self.storage().contains_node(id)
    }

    fn create_node(&mut self, id: NodeId) -> Result<Node, TesselError> {
        self.add_node(id)
    }

    fn cached_counter(&self, group: &str) -> Option<u64> {
        self.group_counters.get(group).copied()
    }

    fn cache_counter(&mut self, group: &str, value: u64) {
        self.group_counters.insert(group.to_string(), value);
    }
}

// =============================================================================
// TESTS
// =============================================================================
