//! Reference stream and map definitions: the top-level key namespace.
//!
//! ```text
//! RefStreamKey (24 bytes)
//!   doc_uid u32 ‖ version_uid u32 ‖ stream_id i64 ‖ part_index i64
//!
//! map-defs entry
//!   RefStreamKey ‖ utf8 map name  ->  map_uid
//! ```
//!
//! Pipeline document UUID and version are interned in the stream-parts table.
//! Because the stream key has a fixed width, a prefix scan of map-defs with a
//! stream key finds exactly that stream's maps.

use crate::codec::cursor::ByteCursor;
use crate::codec::primitive::decode_str;
use crate::error::{Result, StoreError};
use crate::key::fixed::FixedWidthKey;
use crate::kv::{KvRead, KvWrite};
use crate::lookup::uid::{Uid, UidLookupTable};

/// Identifies one loaded reference stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefStreamDefinition {
    pub pipeline_doc_uuid: String,
    pub pipeline_version: String,
    pub stream_id: i64,
    pub part_index: i64,
}

impl RefStreamDefinition {
    pub fn new(
        pipeline_doc_uuid: impl Into<String>,
        pipeline_version: impl Into<String>,
        stream_id: i64,
    ) -> Self {
        Self {
            pipeline_doc_uuid: pipeline_doc_uuid.into(),
            pipeline_version: pipeline_version.into(),
            stream_id,
            part_index: 0,
        }
    }

    pub fn with_part_index(mut self, part_index: i64) -> Self {
        self.part_index = part_index;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline_doc_uuid.is_empty() || self.pipeline_version.is_empty() {
            return Err(StoreError::InvalidKey(
                "pipeline document uuid and version must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// One named map within a reference stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MapDefinition {
    pub stream: RefStreamDefinition,
    pub map_name: String,
}

impl MapDefinition {
    pub fn new(stream: RefStreamDefinition, map_name: impl Into<String>) -> Self {
        Self {
            stream,
            map_name: map_name.into(),
        }
    }
}

/// Encoded form of a [`RefStreamDefinition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefStreamKey {
    pub doc_uid: Uid,
    pub version_uid: Uid,
    pub stream_id: i64,
    pub part_index: i64,
}

impl FixedWidthKey for RefStreamKey {
    const WIDTH: usize = 2 * Uid::WIDTH + 16;

    fn write_key(&self, out: &mut Vec<u8>) {
        self.doc_uid.put(out);
        self.version_uid.put(out);
        out.extend_from_slice(&self.stream_id.to_be_bytes());
        out.extend_from_slice(&self.part_index.to_be_bytes());
    }

    fn read_key(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        Ok(Self {
            doc_uid: Uid::read(cursor)?,
            version_uid: Uid::read(cursor)?,
            stream_id: cursor.read_i64()?,
            part_index: cursor.read_i64()?,
        })
    }
}

fn map_def_bytes(stream_key: &RefStreamKey, map_name: &str) -> Vec<u8> {
    let mut out = stream_key.to_key_bytes();
    out.extend_from_slice(map_name.as_bytes());
    out
}

/// Interns stream and map definitions.
pub struct DefinitionCodec<'a> {
    map_defs: &'a UidLookupTable,
    stream_parts: &'a UidLookupTable,
}

impl<'a> DefinitionCodec<'a> {
    pub fn new(map_defs: &'a UidLookupTable, stream_parts: &'a UidLookupTable) -> Self {
        Self {
            map_defs,
            stream_parts,
        }
    }

    pub fn stream_key_for_put<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        def: &RefStreamDefinition,
    ) -> Result<RefStreamKey> {
        def.validate()?;
        Ok(RefStreamKey {
            doc_uid: self
                .stream_parts
                .get_or_create(txn, def.pipeline_doc_uuid.as_bytes())?,
            version_uid: self
                .stream_parts
                .get_or_create(txn, def.pipeline_version.as_bytes())?,
            stream_id: def.stream_id,
            part_index: def.part_index,
        })
    }

    /// None if the stream was never stored.
    pub fn stream_key_for_get<R: KvRead + ?Sized>(
        &self,
        txn: &R,
        def: &RefStreamDefinition,
    ) -> Result<Option<RefStreamKey>> {
        def.validate()?;
        let Some(doc_uid) = self.stream_parts.get(txn, def.pipeline_doc_uuid.as_bytes())? else {
            return Ok(None);
        };
        let Some(version_uid) = self.stream_parts.get(txn, def.pipeline_version.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(RefStreamKey {
            doc_uid,
            version_uid,
            stream_id: def.stream_id,
            part_index: def.part_index,
        }))
    }

    pub fn resolve_stream<R: KvRead + ?Sized>(
        &self,
        txn: &R,
        key: &RefStreamKey,
    ) -> Result<RefStreamDefinition> {
        Ok(RefStreamDefinition {
            pipeline_doc_uuid: decode_str(self.stream_parts.resolve(txn, key.doc_uid)?)?.to_string(),
            pipeline_version: decode_str(self.stream_parts.resolve(txn, key.version_uid)?)?
                .to_string(),
            stream_id: key.stream_id,
            part_index: key.part_index,
        })
    }

    pub fn map_uid_for_put<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        stream_key: &RefStreamKey,
        map_name: &str,
    ) -> Result<Uid> {
        self.map_defs
            .get_or_create(txn, &map_def_bytes(stream_key, map_name))
    }

    pub fn map_uid_for_get<R: KvRead + ?Sized>(
        &self,
        txn: &R,
        stream_key: &RefStreamKey,
        map_name: &str,
    ) -> Result<Option<Uid>> {
        self.map_defs.get(txn, &map_def_bytes(stream_key, map_name))
    }

    /// Stream key and map name behind a map UID.
    pub fn resolve_map<R: KvRead + ?Sized>(&self, txn: &R, map_uid: Uid) -> Result<(RefStreamKey, String)> {
        let bytes = self.map_defs.resolve(txn, map_uid)?;
        let mut cursor = ByteCursor::new(bytes);
        let stream_key = RefStreamKey::read_key(&mut cursor)?;
        let name = decode_str(cursor.read_rest())?.to_string();
        Ok((stream_key, name))
    }

    /// Every map of a stream as (map UID, map name).
    pub fn maps_of_stream<R: KvRead + ?Sized>(
        &self,
        txn: &R,
        stream_key: &RefStreamKey,
    ) -> Result<Vec<(Uid, String)>> {
        self.map_defs
            .scan_prefix(txn, &stream_key.to_key_bytes())?
            .into_iter()
            .map(|(uid, bytes)| {
                let name = decode_str(&bytes[RefStreamKey::WIDTH..])?.to_string();
                Ok::<_, StoreError>((uid, name))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryKvStore};
    use crate::metrics::StoreMetrics;
    use crate::schema::{MAP_DEFS_UID, STREAM_PARTS_UID};
    use std::sync::Arc;

    fn tables() -> (UidLookupTable, UidLookupTable) {
        let metrics = Arc::new(StoreMetrics::new());
        (
            UidLookupTable::new(MAP_DEFS_UID, 511, Arc::clone(&metrics)),
            UidLookupTable::new(STREAM_PARTS_UID, 511, metrics),
        )
    }

    #[test]
    fn test_stream_key_layout() {
        let key = RefStreamKey {
            doc_uid: Uid::new(1),
            version_uid: Uid::new(2),
            stream_id: 3,
            part_index: 4,
        };
        let bytes = key.to_key_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[..8], &[0, 0, 0, 1, 0, 0, 0, 2]);
        assert_eq!(RefStreamKey::from_key_bytes(&bytes).unwrap(), key);
    }

    #[test]
    fn test_maps_of_stream() {
        let (map_defs, parts) = tables();
        let codec = DefinitionCodec::new(&map_defs, &parts);
        let store = MemoryKvStore::default();
        let mut txn = store.write_txn().unwrap();

        let s1 = RefStreamDefinition::new("doc-uuid", "v1", 100);
        let s2 = RefStreamDefinition::new("doc-uuid", "v1", 101);
        let k1 = codec.stream_key_for_put(&mut txn, &s1).unwrap();
        let k2 = codec.stream_key_for_put(&mut txn, &s2).unwrap();
        assert_eq!(k1.doc_uid, k2.doc_uid, "shared parts are interned once");

        let users = codec.map_uid_for_put(&mut txn, &k1, "users").unwrap();
        let hosts = codec.map_uid_for_put(&mut txn, &k1, "hosts").unwrap();
        codec.map_uid_for_put(&mut txn, &k2, "users").unwrap();

        let maps = codec.maps_of_stream(&txn, &k1).unwrap();
        assert_eq!(maps, vec![(hosts, "hosts".to_string()), (users, "users".to_string())]);
        assert_eq!(codec.resolve_map(&txn, users).unwrap(), (k1, "users".to_string()));
        assert_eq!(codec.resolve_stream(&txn, &k1).unwrap(), s1);
    }

    #[test]
    fn test_lookup_of_unknown_stream() {
        let (map_defs, parts) = tables();
        let codec = DefinitionCodec::new(&map_defs, &parts);
        let store = MemoryKvStore::default();
        let read = store.read_txn().unwrap();
        let def = RefStreamDefinition::new("nope", "v1", 1);
        assert_eq!(codec.stream_key_for_get(&read, &def).unwrap(), None);
    }

    #[test]
    fn test_empty_parts_rejected() {
        let (map_defs, parts) = tables();
        let codec = DefinitionCodec::new(&map_defs, &parts);
        let store = MemoryKvStore::default();
        let mut txn = store.write_txn().unwrap();
        let err = codec
            .stream_key_for_put(&mut txn, &RefStreamDefinition::new("", "v1", 1))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_KEY");
    }
}
