//! Composite key codecs.
//!
//! A key/value entry is stored under `map_uid ‖ KeyPrefix`:
//!
//! ```text
//! KeyPrefix
//!   [0] ‖ variable key of the encoded typed value      SINGLE
//!   [1] ‖ tag set (names_uid ‖ value_uid × n)          TAGS
//! ```

pub mod definition;
pub mod fixed;
pub mod range;
pub mod tags;
pub mod variable;

pub use definition::{DefinitionCodec, MapDefinition, RefStreamDefinition, RefStreamKey};
pub use fixed::FixedWidthKey;
pub use range::{RangeKey, ValueRange};
pub use tags::{Tag, TagUids, TagsCodec};
pub use variable::{VariableKey, VariableKeyCodec, VariableKeyKind, DIRECT_ENTRY_KEY_OVERHEAD};

use crate::codec::cursor::ByteCursor;
use crate::codec::value::TypedValue;
use crate::config::HashLength;
use crate::error::{Result, StoreError};
use crate::kv::{KvRead, KvWrite};
use crate::lookup::hash::HashLookupKey;
use crate::lookup::uid::Uid;

const KIND_SINGLE: u8 = 0;
const KIND_TAGS: u8 = 1;

/// The semantic leading component of a key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPrefix {
    Single(TypedValue),
    Tags(Vec<Tag>),
}

impl KeyPrefix {
    /// Integer view of a single-value key, used for range fallback.
    pub fn range_point(&self) -> Option<i64> {
        match self {
            KeyPrefix::Single(value) => value.as_range_point(),
            KeyPrefix::Tags(_) => None,
        }
    }
}

impl From<TypedValue> for KeyPrefix {
    fn from(value: TypedValue) -> Self {
        KeyPrefix::Single(value)
    }
}

impl From<&str> for KeyPrefix {
    fn from(value: &str) -> Self {
        KeyPrefix::Single(TypedValue::from(value))
    }
}

impl From<Vec<Tag>> for KeyPrefix {
    fn from(tags: Vec<Tag>) -> Self {
        KeyPrefix::Tags(tags)
    }
}

/// What callers address: a map and a key within it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeKey {
    pub map: MapDefinition,
    pub prefix: KeyPrefix,
}

impl CompositeKey {
    pub fn new(map: MapDefinition, prefix: impl Into<KeyPrefix>) -> Self {
        Self {
            map,
            prefix: prefix.into(),
        }
    }
}

/// Lookup ids referenced by one encoded key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrefixLookups {
    pub key_uid: Option<Uid>,
    pub key_hash: Option<HashLookupKey>,
    pub tags: TagUids,
}

impl PrefixLookups {
    /// Parse an encoded prefix without resolving anything.
    pub fn read(cursor: &mut ByteCursor<'_>, hash_length: HashLength) -> Result<Self> {
        match cursor.read_u8()? {
            KIND_SINGLE => {
                let mut found = Self::default();
                match VariableKey::read(cursor, hash_length)? {
                    VariableKey::Direct(_) => {}
                    VariableKey::UidLookup(uid) => found.key_uid = Some(uid),
                    VariableKey::HashLookup(id) => found.key_hash = Some(id),
                }
                Ok(found)
            }
            KIND_TAGS => Ok(Self {
                tags: TagUids::read(cursor)?,
                ..Self::default()
            }),
            other => Err(unknown_kind(other)),
        }
    }
}

fn unknown_kind(kind: u8) -> StoreError {
    StoreError::corruption(format!("unknown key prefix kind {}", kind))
}

pub struct KeyPrefixCodec<'a> {
    pub variable: VariableKeyCodec<'a>,
    pub tags: TagsCodec<'a>,
}

impl<'a> KeyPrefixCodec<'a> {
    pub fn encode_for_put<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        prefix: &KeyPrefix,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        match prefix {
            KeyPrefix::Single(value) => {
                out.push(KIND_SINGLE);
                self.variable.encode_for_put(txn, &value.encode(), out)?;
            }
            KeyPrefix::Tags(tags) => {
                out.push(KIND_TAGS);
                self.tags.encode_for_put(txn, tags, out)?;
            }
        }
        Ok(())
    }

    /// Returns false if the prefix cannot be part of any stored key.
    pub fn encode_for_get<R: KvRead + ?Sized>(
        &self,
        txn: &R,
        prefix: &KeyPrefix,
        out: &mut Vec<u8>,
    ) -> Result<bool> {
        match prefix {
            KeyPrefix::Single(value) => {
                out.push(KIND_SINGLE);
                self.variable.encode_for_get(txn, &value.encode(), out)
            }
            KeyPrefix::Tags(tags) => {
                out.push(KIND_TAGS);
                self.tags.encode_for_get(txn, tags, out)
            }
        }
    }

    pub fn decode<R: KvRead + ?Sized>(&self, txn: &R, cursor: &mut ByteCursor<'_>) -> Result<KeyPrefix> {
        match cursor.read_u8()? {
            KIND_SINGLE => {
                let bytes = self.variable.decode(txn, cursor)?;
                Ok(KeyPrefix::Single(TypedValue::decode(&bytes)?))
            }
            KIND_TAGS => Ok(KeyPrefix::Tags(self.tags.decode(txn, cursor)?)),
            other => Err(unknown_kind(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::kv::{KvStore, MemoryKvStore};
    use crate::lookup::LookupTables;
    use crate::metrics::StoreMetrics;
    use std::sync::Arc;

    fn codec(tables: &LookupTables) -> KeyPrefixCodec<'_> {
        KeyPrefixCodec {
            variable: VariableKeyCodec::new(&tables.keys_uid, &tables.keys_hash, 32, 511),
            tags: TagsCodec::new(&tables.tag_names, &tables.tag_values),
        }
    }

    #[test]
    fn test_single_prefix_roundtrip() {
        let config = StoreConfig::default();
        let tables = LookupTables::new(&config, &Arc::new(StoreMetrics::new()));
        let codec = codec(&tables);
        let store = MemoryKvStore::default();
        let mut txn = store.write_txn().unwrap();

        for prefix in [
            KeyPrefix::from("abc"),
            KeyPrefix::Single(TypedValue::Long(-1)),
            KeyPrefix::Single(TypedValue::Blob(vec![3u8; 400])),
            KeyPrefix::Single(TypedValue::Blob(vec![4u8; 4000])),
            KeyPrefix::Tags(vec![Tag::new("b", "2"), Tag::new("a", "1")]),
            KeyPrefix::Tags(vec![]),
        ] {
            let mut key = Vec::new();
            codec.encode_for_put(&mut txn, &prefix, &mut key).unwrap();
            let decoded = codec.decode(&txn, &mut ByteCursor::new(&key)).unwrap();
            match (&prefix, &decoded) {
                (KeyPrefix::Tags(orig), KeyPrefix::Tags(back)) => {
                    let mut orig = orig.clone();
                    orig.sort_by(|a, b| a.name.cmp(&b.name));
                    assert_eq!(&orig, back);
                }
                _ => assert_eq!(decoded, prefix),
            }
        }
    }

    #[test]
    fn test_abc_is_direct() {
        let config = StoreConfig::default();
        let tables = LookupTables::new(&config, &Arc::new(StoreMetrics::new()));
        let codec = codec(&tables);
        let store = MemoryKvStore::default();
        let mut txn = store.write_txn().unwrap();
        let mut key = Vec::new();
        codec
            .encode_for_put(&mut txn, &KeyPrefix::from("abc"), &mut key)
            .unwrap();
        assert_eq!(key, vec![KIND_SINGLE, VariableKeyKind::Direct as u8, 9, b'a', b'b', b'c']);
        let lookups = PrefixLookups::read(&mut ByteCursor::new(&key), HashLength::Long).unwrap();
        assert_eq!(lookups, PrefixLookups::default());
    }

    #[test]
    fn test_prefix_lookups_report_ids() {
        let config = StoreConfig::default();
        let tables = LookupTables::new(&config, &Arc::new(StoreMetrics::new()));
        let codec = codec(&tables);
        let store = MemoryKvStore::default();
        let mut txn = store.write_txn().unwrap();

        let mut key = Vec::new();
        codec
            .encode_for_put(&mut txn, &KeyPrefix::Single(TypedValue::Blob(vec![1u8; 100])), &mut key)
            .unwrap();
        let lookups = PrefixLookups::read(&mut ByteCursor::new(&key), HashLength::Long).unwrap();
        assert_eq!(lookups.key_uid, Some(Uid::new(0)));

        let mut key = Vec::new();
        codec
            .encode_for_put(&mut txn, &KeyPrefix::Tags(vec![Tag::new("k", "v")]), &mut key)
            .unwrap();
        let lookups = PrefixLookups::read(&mut ByteCursor::new(&key), HashLength::Long).unwrap();
        assert_eq!(lookups.tags.names, Some(Uid::new(0)));
        assert_eq!(lookups.tags.values, vec![Uid::new(0)]);
    }

    #[test]
    fn test_unknown_kind_is_corruption() {
        let config = StoreConfig::default();
        let tables = LookupTables::new(&config, &Arc::new(StoreMetrics::new()));
        let store = MemoryKvStore::default();
        let read = store.read_txn().unwrap();
        let err = codec(&tables)
            .decode(&read, &mut ByteCursor::new(&[7, 0]))
            .unwrap_err();
        assert_eq!(err.code(), "CORRUPTION");
    }
}
