//! Purging: whole reference streams, aged streams, and unused lookup entries.
//!
//! Streams are purged by deleting every entry of their maps and releasing
//! the referenced values. Lookup entries (keys, tags, map definitions,
//! stream parts) are reclaimed separately by a mark/sweep pass, because
//! one entry may be shared by many streams.

use crate::codec::cursor::ByteCursor;
use crate::error::Result;
use crate::key::{FixedWidthKey, PrefixLookups, RangeKey, RefStreamDefinition, RefStreamKey};
use crate::kv::{KeyRange, KvRead, KvStore, KvWrite, Table};
use crate::lookup::uid::Uid;
use crate::lookup::LookupTable;
use crate::record::processing_info::{self, ProcessingInfo, ProcessingState};
use crate::schema::{KEY_VALUE, PROCESSING_INFO, RANGE_VALUE};

use super::RefDataStore;

/// Entries removed per lookup table by one mark/sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub removed: Vec<(&'static str, u64)>,
}

impl PurgeSummary {
    pub fn total(&self) -> u64 {
        self.removed.iter().map(|(_, n)| n).sum()
    }

    pub fn removed_from(&self, table: &str) -> u64 {
        self.removed
            .iter()
            .find(|(name, _)| *name == table)
            .map_or(0, |(_, n)| *n)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamPurgeSummary {
    pub maps: usize,
    pub entries: u64,
    /// Values whose last reference went away.
    pub values_deleted: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeOldSummary {
    pub streams_purged: usize,
    pub streams_failed: usize,
    pub entries: u64,
    pub unused: PurgeSummary,
}

fn collect_entries<R: KvRead + ?Sized>(
    txn: &R,
    table: Table,
    range: KeyRange<'_>,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut entries = Vec::new();
    for item in txn.scan(table, range)? {
        let (key, value) = item?;
        entries.push((key.to_vec(), value.to_vec()));
    }
    Ok(entries)
}

fn collect_keys<R: KvRead + ?Sized>(txn: &R, table: Table) -> Result<Vec<Vec<u8>>> {
    let mut keys = Vec::new();
    for item in txn.scan(table, KeyRange::All)? {
        keys.push(item?.0.to_vec());
    }
    Ok(keys)
}

/// A COMPLETE stream is purged once idle for longer than `purge_age_ms`;
/// any other state means the stream never became (or stopped being) usable.
fn is_purge_candidate(info: &ProcessingInfo, now_ms: i64, purge_age_ms: u64) -> bool {
    match info.state {
        ProcessingState::Complete => {
            let age = i64::try_from(purge_age_ms).unwrap_or(i64::MAX);
            now_ms.saturating_sub(info.last_accessed_time_ms) > age
        }
        _ => true,
    }
}

impl<S: KvStore> RefDataStore<S> {
    /// Delete every lookup entry no live entry refers to.
    ///
    /// Marking, sweeping and clearing the marks happen in one write
    /// transaction, so a failed purge leaves no trace.
    pub fn purge_unused(&self) -> Result<PurgeSummary> {
        let mut txn = self.kv.write_txn()?;
        let summary = self.purge_unused_in(&mut txn)?;
        txn.commit()?;
        self.metrics.record_purge(summary.total());
        tracing::info!("Purge removed {} unused lookup entries", summary.total());
        Ok(summary)
    }

    fn purge_unused_in<W: KvWrite + ?Sized>(&self, txn: &mut W) -> Result<PurgeSummary> {
        let lookups = &self.lookups;
        for table in lookups.uid_tables() {
            table.clear_marks(txn)?;
        }
        lookups.keys_hash.clear_marks(txn)?;

        for key in collect_keys(&*txn, KEY_VALUE)? {
            let mut cursor = ByteCursor::new(&key);
            let map_uid = Uid::read(&mut cursor)?;
            lookups.map_defs.mark_used(txn, &map_uid.to_bytes())?;

            let found = PrefixLookups::read(&mut cursor, self.config.hash_length)?;
            if let Some(uid) = found.key_uid {
                lookups.keys_uid.mark_used(txn, &uid.to_bytes())?;
            }
            if let Some(id) = found.key_hash {
                lookups.keys_hash.mark_used(txn, id.as_bytes())?;
            }
            if let Some(uid) = found.tags.names {
                lookups.tag_names.mark_used(txn, &uid.to_bytes())?;
            }
            for uid in found.tags.values {
                lookups.tag_values.mark_used(txn, &uid.to_bytes())?;
            }
        }

        for key in collect_keys(&*txn, RANGE_VALUE)? {
            let range_key = RangeKey::from_key_bytes(&key)?;
            lookups.map_defs.mark_used(txn, &range_key.map_uid.to_bytes())?;
        }

        // Stream parts are live while a stream has ProcessingInfo or a live map.
        let mut streams = Vec::new();
        for key in collect_keys(&*txn, PROCESSING_INFO)? {
            streams.push(RefStreamKey::from_key_bytes(&key)?);
        }
        let defs = self.definitions();
        for id in lookups.map_defs.marked_ids(&*txn)? {
            let (stream_key, _) = defs.resolve_map(&*txn, Uid::from_bytes(&id)?)?;
            streams.push(stream_key);
        }
        for stream_key in streams {
            lookups
                .stream_parts
                .mark_used(txn, &stream_key.doc_uid.to_bytes())?;
            lookups
                .stream_parts
                .mark_used(txn, &stream_key.version_uid.to_bytes())?;
        }

        let mut summary = PurgeSummary::default();
        for table in lookups.uid_tables() {
            summary.removed.push((table.name(), table.sweep_unmarked(txn)?));
            table.clear_marks(txn)?;
        }
        summary.removed.push((
            lookups.keys_hash.name(),
            lookups.keys_hash.sweep_unmarked(txn)?,
        ));
        lookups.keys_hash.clear_marks(txn)?;
        Ok(summary)
    }

    /// Remove one stream's entries and ProcessingInfo. None if the stream
    /// was never stored.
    pub fn purge_ref_stream(&self, def: &RefStreamDefinition) -> Result<Option<StreamPurgeSummary>> {
        let mut txn = self.kv.write_txn()?;
        let Some(stream_key) = self.definitions().stream_key_for_get(&txn, def)? else {
            return Ok(None);
        };
        let summary = self.purge_stream_in(&mut txn, &stream_key)?;
        txn.commit()?;
        self.metrics.record_stream_purged();
        tracing::info!(
            "Purged stream {}:{} part {}: {} entries, {} values released",
            def.pipeline_doc_uuid,
            def.stream_id,
            def.part_index,
            summary.entries,
            summary.values_deleted
        );
        Ok(Some(summary))
    }

    fn purge_stream_in<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        stream_key: &RefStreamKey,
    ) -> Result<StreamPurgeSummary> {
        let maps = self.definitions().maps_of_stream(&*txn, stream_key)?;
        let mut summary = StreamPurgeSummary {
            maps: maps.len(),
            ..StreamPurgeSummary::default()
        };
        for (map_uid, _) in &maps {
            let prefix = map_uid.to_bytes();
            for table in [KEY_VALUE, RANGE_VALUE] {
                for (key, value) in collect_entries(&*txn, table, KeyRange::Prefix(&prefix))? {
                    txn.delete(table, &key)?;
                    let value_key = self.values.parse_key(&value)?;
                    if self
                        .values
                        .de_reference_or_delete(txn, &value_key, &self.pool)?
                    {
                        summary.values_deleted += 1;
                    }
                    summary.entries += 1;
                }
            }
        }
        txn.delete(PROCESSING_INFO, &stream_key.to_key_bytes())?;
        Ok(summary)
    }

    fn purge_stream_by_key(&self, stream_key: &RefStreamKey) -> Result<StreamPurgeSummary> {
        let mut txn = self.kv.write_txn()?;
        let summary = self.purge_stream_in(&mut txn, stream_key)?;
        txn.commit()?;
        Ok(summary)
    }

    fn mark_purge_failed(&self, stream_key: &RefStreamKey) -> Result<()> {
        let mut txn = self.kv.write_txn()?;
        let key_bytes = stream_key.to_key_bytes();
        let mut info = self.pool.checkout();
        match txn.get(PROCESSING_INFO, &key_bytes)? {
            Some(stored) => info.extend_from_slice(stored),
            None => return Ok(()),
        }
        processing_info::write_state(&mut info, ProcessingState::PurgeFailed)?;
        txn.put(PROCESSING_INFO, &key_bytes, &info)?;
        txn.commit()
    }

    /// Purge every stream that is idle past `purge_age_ms` (measured from
    /// `now_ms`) or not COMPLETE, then sweep unused lookup entries.
    ///
    /// Each stream is purged in its own transaction; a stream that fails is
    /// marked PURGE_FAILED and the rest continue.
    pub fn purge_old_data(&self, now_ms: i64) -> Result<PurgeOldSummary> {
        let candidates = {
            let txn = self.kv.read_txn()?;
            let mut candidates = Vec::new();
            for item in txn.scan(PROCESSING_INFO, KeyRange::All)? {
                let (key, value) = item?;
                let info = ProcessingInfo::decode(value)?;
                if is_purge_candidate(&info, now_ms, self.config.purge_age_ms) {
                    candidates.push(RefStreamKey::from_key_bytes(key)?);
                }
            }
            candidates
        };

        let mut summary = PurgeOldSummary::default();
        for stream_key in candidates {
            match self.purge_stream_by_key(&stream_key) {
                Ok(purged) => {
                    self.metrics.record_stream_purged();
                    summary.streams_purged += 1;
                    summary.entries += purged.entries;
                }
                Err(e) => {
                    tracing::warn!("Failed to purge stream {:?}: {}", stream_key, e);
                    summary.streams_failed += 1;
                    if let Err(e) = self.mark_purge_failed(&stream_key) {
                        tracing::warn!("Could not record purge failure for {:?}: {}", stream_key, e);
                    }
                }
            }
        }

        summary.unused = self.purge_unused()?;
        tracing::info!(
            "Purged {} old streams ({} failed), {} entries",
            summary.streams_purged,
            summary.streams_failed,
            summary.entries
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::value::TypedValue;
    use crate::config::StoreConfig;
    use crate::key::{CompositeKey, KeyPrefix, MapDefinition, Tag, ValueRange};
    use crate::kv::MemoryKvStore;

    fn store() -> RefDataStore<MemoryKvStore> {
        RefDataStore::open(MemoryKvStore::default(), StoreConfig::default()).unwrap()
    }

    #[test]
    fn test_candidate_rules() {
        let info = |last: i64, state| ProcessingInfo {
            create_time_ms: 0,
            last_accessed_time_ms: last,
            effective_time_ms: 0,
            state,
        };
        assert!(!is_purge_candidate(&info(900, ProcessingState::Complete), 1_000, 100));
        assert!(is_purge_candidate(&info(899, ProcessingState::Complete), 1_000, 100));
        assert!(is_purge_candidate(&info(1_000, ProcessingState::Failed), 1_000, 100));
        assert!(is_purge_candidate(&info(1_000, ProcessingState::LoadInProgress), 1_000, 100));
        assert!(!is_purge_candidate(&info(0, ProcessingState::Complete), 1_000, u64::MAX));
    }

    #[test]
    fn test_purge_unused_keeps_live_lookups() {
        let store = store();
        let stream = RefStreamDefinition::new("pipe", "v1", 1);
        let map = MapDefinition::new(stream.clone(), "m");
        let long_key = "k".repeat(100);
        store
            .put(&CompositeKey::new(map.clone(), long_key.as_str()), &TypedValue::Int(1))
            .unwrap();
        store
            .put(
                &CompositeKey::new(map.clone(), vec![Tag::new("env", "prod")]),
                &TypedValue::Int(2),
            )
            .unwrap();

        let summary = store.purge_unused().unwrap();
        assert_eq!(summary.total(), 0);
        assert_eq!(
            store
                .get(&CompositeKey::new(map.clone(), long_key.as_str()))
                .unwrap(),
            Some(TypedValue::Int(1))
        );

        // Deleting the entries orphans the key and tag lookups.
        store
            .delete(&CompositeKey::new(map.clone(), long_key.as_str()))
            .unwrap();
        store
            .delete(&CompositeKey::new(map.clone(), vec![Tag::new("env", "prod")]))
            .unwrap();
        let summary = store.purge_unused().unwrap();
        assert_eq!(summary.removed_from("keys-uid"), 1);
        assert_eq!(summary.removed_from("tag-names"), 1);
        assert_eq!(summary.removed_from("tag-values"), 1);
        // The map has no entries left, but the stream still has ProcessingInfo.
        assert_eq!(summary.removed_from("map-defs"), 1);
        assert_eq!(summary.removed_from("stream-parts"), 0);
        assert!(store.get_processing_info(&stream).unwrap().is_some());

        let counts = store.entry_counts().unwrap();
        assert_eq!(counts["keys-uid-used"], 0, "marks are cleared after a purge");
    }

    #[test]
    fn test_purge_ref_stream_releases_shared_values() {
        let store = store();
        let a = RefStreamDefinition::new("pipe", "v1", 1);
        let b = RefStreamDefinition::new("pipe", "v1", 2);
        let shared = TypedValue::from("shared");
        for def in [&a, &b] {
            let mut loader = store.begin_load(def, 0).unwrap();
            loader.put("m", &KeyPrefix::from("x"), &shared).unwrap();
            loader
                .put_range("r", ValueRange::new(1, 5).unwrap(), &TypedValue::Int(9))
                .unwrap();
            loader.complete().unwrap();
        }
        let key_b = CompositeKey::new(MapDefinition::new(b.clone(), "m"), "x");
        assert_eq!(store.value_reference_count(&key_b).unwrap(), Some(2));

        let summary = store.purge_ref_stream(&a).unwrap().unwrap();
        assert_eq!(summary.maps, 2);
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.values_deleted, 0);
        assert_eq!(store.value_reference_count(&key_b).unwrap(), Some(1));
        assert_eq!(store.get(&key_b).unwrap(), Some(shared));
        assert_eq!(store.get_processing_info(&a).unwrap(), None);

        let summary = store.purge_ref_stream(&b).unwrap().unwrap();
        assert_eq!(summary.values_deleted, 2);
        assert_eq!(store.entry_counts().unwrap()["value-store"], 0);

        store.purge_unused().unwrap();
        let counts = store.entry_counts().unwrap();
        assert_eq!(counts["map-defs-fwd"], 0);
        assert_eq!(counts["stream-parts-fwd"], 0);
        assert_eq!(store.purge_ref_stream(&a).unwrap(), None);
    }

    #[test]
    fn test_purge_old_data() {
        let store = store();
        let fresh = RefStreamDefinition::new("pipe", "v1", 1);
        let stale = RefStreamDefinition::new("pipe", "v1", 2);
        let failed = RefStreamDefinition::new("pipe", "v1", 3);
        for def in [&fresh, &stale, &failed] {
            let mut loader = store.begin_load(def, 0).unwrap();
            loader.put("m", &KeyPrefix::from("k"), &TypedValue::Int(1)).unwrap();
            loader.complete().unwrap();
        }
        let age = store.config().purge_age_ms as i64;
        let now = 10 * age;
        store.update_last_accessed_at(&fresh, now - 1).unwrap();
        store.update_last_accessed_at(&stale, now - age - 1).unwrap();
        store.update_last_accessed_at(&failed, now).unwrap();
        store
            .set_processing_state(&failed, ProcessingState::Failed)
            .unwrap();

        let summary = store.purge_old_data(now).unwrap();
        assert_eq!(summary.streams_purged, 2);
        assert_eq!(summary.streams_failed, 0);
        assert_eq!(summary.entries, 2);

        let remaining: Vec<_> = store
            .list_ref_streams()
            .unwrap()
            .into_iter()
            .map(|(def, _)| def)
            .collect();
        assert_eq!(remaining, vec![fresh.clone()]);
        assert_eq!(
            store
                .get(&CompositeKey::new(MapDefinition::new(fresh, "m"), "k"))
                .unwrap(),
            Some(TypedValue::Int(1))
        );
        assert_eq!(store.metrics().streams_purged, 2);
    }
}
