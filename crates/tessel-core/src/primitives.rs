//! # Engine Primitives
//!
//! Hardcoded constants shared across the Tessel engine.
//!
//! These are compiled into the binary and are immutable at runtime:
//! reserved names, identifier separators and exchange-format limits.

// =============================================================================
// RESERVED NAMES
// =============================================================================

/// Property names starting with this prefix belong to the engine.
///
/// Entity accessors reject user writes to such names with
/// `TesselError::InvalidPropName`.
pub const RESERVED_PROP_PREFIX: &str = "__";

/// Reserved property holding a node's type descriptor.
pub const TYPE_PROP: &str = "__type__";

/// Type descriptor reported for nodes that never had one set.
pub const DEFAULT_NODE_TYPE: &str = "node";

/// Value written by the delta storage in place of a removed property.
///
/// A base layer is immutable from the overlay's point of view, so removal is
/// recorded in the present layer as this marker and filtered out on read.
pub const DELETED_SENTINEL: &str = "\u{0}__tessel_deleted__\u{0}";

// =============================================================================
// IDENTIFIER SEPARATORS
// =============================================================================

/// Separates the graph name from the edge type inside an `EdgeId`.
pub const EDGE_TYPE_SEPARATOR: char = ':';

/// Separates the graph name from the group inside a grouped node id.
pub const GROUP_SEPARATOR: char = '@';

/// Separates the group from the suffix inside a grouped node id.
pub const SUFFIX_SEPARATOR: char = '#';

/// Metadata key suffix for a group counter (`<graph>@<group>_cnt`).
pub const GROUP_COUNTER_SUFFIX: &str = "_cnt";

/// Metadata key suffix for the group registry (`<graph>@__groups`).
pub const GROUP_REGISTRY_SUFFIX: &str = "__groups";

// =============================================================================
// SNAPSHOT FORMAT
// =============================================================================

/// Magic bytes for the binary snapshot format.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"TSNP";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot format.
pub const SNAPSHOT_VERSION: u8 = 1;

/// Maximum accepted snapshot size (500 MB).
///
/// Validated before any deserialization is attempted.
pub const MAX_SNAPSHOT_PAYLOAD_SIZE: usize = 500 * 1024 * 1024;

/// Maximum node count accepted by a snapshot import.
pub const MAX_IMPORT_NODE_COUNT: u64 = 1_000_000;

/// Maximum edge count accepted by a snapshot import.
pub const MAX_IMPORT_EDGE_COUNT: u64 = 10_000_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_reserved_looking() {
        // Must never collide with a plausible user string.
        assert!(DELETED_SENTINEL.starts_with('\u{0}'));
    }

    #[test]
    fn type_prop_is_reserved() {
        assert!(TYPE_PROP.starts_with(RESERVED_PROP_PREFIX));
    }

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(&SNAPSHOT_MAGIC, b"TSNP");
    }
}
