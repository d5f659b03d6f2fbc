//! Lookup tables that intern byte sequences behind small ids.
//!
//! - [`UidLookupTable`]: sequential 4-byte UIDs, for low/medium cardinality
//! - [`HashLookupTable`]: content hash + ordinal, for large values
//! - [`used`]: mark/sweep support shared by both

pub mod hash;
pub mod uid;
pub mod used;

pub use hash::{ContentHasher, HashLookupKey, HashLookupTable};
pub use uid::{Uid, UidLookupTable};
pub use used::LookupTable;

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::metrics::StoreMetrics;
use crate::schema;

/// Every lookup table of a store.
pub struct LookupTables {
    pub keys_uid: UidLookupTable,
    pub keys_hash: HashLookupTable,
    pub tag_names: UidLookupTable,
    pub tag_values: UidLookupTable,
    pub map_defs: UidLookupTable,
    pub stream_parts: UidLookupTable,
}

impl LookupTables {
    pub fn new(config: &StoreConfig, metrics: &Arc<StoreMetrics>) -> Self {
        let uid_table =
            |spec| UidLookupTable::new(spec, config.max_key_length, Arc::clone(metrics));
        Self {
            keys_uid: uid_table(schema::KEYS_UID),
            keys_hash: HashLookupTable::new(schema::KEYS_HASH, config, Arc::clone(metrics)),
            tag_names: uid_table(schema::TAG_NAMES_UID),
            tag_values: uid_table(schema::TAG_VALUES_UID),
            map_defs: uid_table(schema::MAP_DEFS_UID),
            stream_parts: uid_table(schema::STREAM_PARTS_UID),
        }
    }

    /// The UID tables, in sweep order.
    pub fn uid_tables(&self) -> [&UidLookupTable; 5] {
        [
            &self.keys_uid,
            &self.tag_names,
            &self.tag_values,
            &self.map_defs,
            &self.stream_parts,
        ]
    }
}
