//! Fixed table layout of the store.
//!
//! ```text
//! Table                 Key                                   Value
//! meta                  utf8 name                             setting bytes
//! key-value             map_uid ‖ KeyPrefix                   value-store key
//! range-value           map_uid ‖ from i64 ‖ to i64           value-store key
//! value-store           hash ‖ ordinal u16                    ValueRecord
//! processing-info       RefStreamKey (24 bytes)               ProcessingInfo (25 bytes)
//! <uid>-fwd             value bytes                           uid u32
//! <uid>-rev             uid u32                               value bytes
//! <hash>                hash ‖ ordinal u16                    value bytes
//! <lookup>-used         lookup id                             (empty)
//! ```
//!
//! All integers are big-endian so that key order equals numeric order for
//! non-negative values.

use crate::kv::Table;

pub const META: Table = Table::new("meta");
pub const KEY_VALUE: Table = Table::new("key-value");
pub const RANGE_VALUE: Table = Table::new("range-value");
pub const VALUE_STORE: Table = Table::new("value-store");
pub const PROCESSING_INFO: Table = Table::new("processing-info");

/// Meta key holding the persisted hash width (one byte).
pub const META_HASH_WIDTH: &[u8] = b"hash-width";
/// Meta key holding the on-disk format version (u16).
pub const META_FORMAT_VERSION: &[u8] = b"format-version";
pub const FORMAT_VERSION: u16 = 1;

/// Tables backing one UID lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidTableSpec {
    pub name: &'static str,
    pub forward: Table,
    pub reverse: Table,
    pub used: Table,
}

impl UidTableSpec {
    /// Meta key of the persisted next-UID counter.
    pub fn counter_key(&self) -> Vec<u8> {
        format!("uid-counter:{}", self.name).into_bytes()
    }
}

/// Tables backing one hash lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashTableSpec {
    pub name: &'static str,
    pub entries: Table,
    pub used: Table,
}

/// Medium-sized variable keys.
pub const KEYS_UID: UidTableSpec = UidTableSpec {
    name: "keys-uid",
    forward: Table::new("keys-uid-fwd"),
    reverse: Table::new("keys-uid-rev"),
    used: Table::new("keys-uid-used"),
};

/// Large variable keys.
pub const KEYS_HASH: HashTableSpec = HashTableSpec {
    name: "keys-hash",
    entries: Table::new("keys-hash"),
    used: Table::new("keys-hash-used"),
};

/// Canonical (sorted) tag-name lists.
pub const TAG_NAMES_UID: UidTableSpec = UidTableSpec {
    name: "tag-names",
    forward: Table::new("tag-names-fwd"),
    reverse: Table::new("tag-names-rev"),
    used: Table::new("tag-names-used"),
};

pub const TAG_VALUES_UID: UidTableSpec = UidTableSpec {
    name: "tag-values",
    forward: Table::new("tag-values-fwd"),
    reverse: Table::new("tag-values-rev"),
    used: Table::new("tag-values-used"),
};

/// Map definitions (ref stream key ‖ map name).
pub const MAP_DEFS_UID: UidTableSpec = UidTableSpec {
    name: "map-defs",
    forward: Table::new("map-defs-fwd"),
    reverse: Table::new("map-defs-rev"),
    used: Table::new("map-defs-used"),
};

/// Pipeline document UUIDs and versions of ref stream definitions.
pub const STREAM_PARTS_UID: UidTableSpec = UidTableSpec {
    name: "stream-parts",
    forward: Table::new("stream-parts-fwd"),
    reverse: Table::new("stream-parts-rev"),
    used: Table::new("stream-parts-used"),
};

pub const UID_TABLES: [UidTableSpec; 5] = [
    KEYS_UID,
    TAG_NAMES_UID,
    TAG_VALUES_UID,
    MAP_DEFS_UID,
    STREAM_PARTS_UID,
];

/// Every table a backend must create at open.
pub fn all_tables() -> Vec<Table> {
    let mut tables = vec![META, KEY_VALUE, RANGE_VALUE, VALUE_STORE, PROCESSING_INFO];
    for spec in UID_TABLES {
        tables.extend([spec.forward, spec.reverse, spec.used]);
    }
    tables.extend([KEYS_HASH.entries, KEYS_HASH.used]);
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_table_names_unique() {
        let tables = all_tables();
        let names: HashSet<&str> = tables.iter().map(|t| t.name()).collect();
        assert_eq!(names.len(), tables.len());
        assert_eq!(tables.len(), 5 + 5 * 3 + 2);
    }

    #[test]
    fn test_counter_keys_distinct() {
        let keys: HashSet<Vec<u8>> = UID_TABLES.iter().map(|s| s.counter_key()).collect();
        assert_eq!(keys.len(), UID_TABLES.len());
    }
}
