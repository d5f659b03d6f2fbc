//! RefDataStore: typed reference data over a transactional KV store.
//!
//! Entries are addressed by a [`CompositeKey`] (stream, map name, key
//! prefix). Every public operation runs in its own transaction; bulk loads
//! go through a [`RefDataLoader`] that holds one write transaction for the
//! whole stream.
//!
//! # Write path
//!
//! ```text
//! put(key, value)
//!   stream def  -> stream-parts UIDs  -> RefStreamKey (+ ProcessingInfo)
//!   map name    -> map-defs UID
//!   KeyPrefix   -> SINGLE / TAGS encoding (may intern into lookup tables)
//!   value       -> value-store key (deduplicated, ref counted)
//!   key-value[map_uid ‖ prefix] = value-store key
//! ```
//!
//! Reads follow the same path with lookups that never intern; any missing
//! lookup short-circuits to "not found".

mod loader;
mod purge;

pub use loader::{LoadSummary, RefDataLoader};
pub use purge::{PurgeOldSummary, PurgeSummary, StreamPurgeSummary};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::buffer_pool::BufferPool;
use crate::codec::primitive::FixedWidth;
use crate::codec::value::{RawValue, TypedValue};
use crate::config::{HashLength, StoreConfig};
use crate::error::{Result, StoreError};
use crate::key::fixed::OrderedI64;
use crate::key::{
    CompositeKey, DefinitionCodec, FixedWidthKey, KeyPrefix, KeyPrefixCodec, MapDefinition,
    RangeKey, RefStreamDefinition, RefStreamKey, TagsCodec, ValueRange, VariableKeyCodec,
};
use crate::kv::{KeyRange, KvRead, KvStore, KvWrite, Table};
use crate::lookup::hash::{ContentHasher, HashLookupKey, HashLookupTable};
use crate::lookup::uid::Uid;
use crate::lookup::LookupTables;
use crate::metrics::{MetricsSnapshot, StoreMetrics};
use crate::record::processing_info::{self, now_ms, ProcessingInfo, ProcessingState};
use crate::schema::{
    self, FORMAT_VERSION, KEY_VALUE, META, META_FORMAT_VERSION, META_HASH_WIDTH, PROCESSING_INFO,
    RANGE_VALUE,
};
use crate::value_store::ValueStore;

/// What a put did to the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Replaced,
    /// The entry already held an equal value.
    Unchanged,
    /// The entry exists and `overwrite_existing` is off.
    Ignored,
}

pub struct RefDataStore<S: KvStore> {
    kv: S,
    config: StoreConfig,
    lookups: LookupTables,
    values: ValueStore,
    pool: BufferPool,
    metrics: Arc<StoreMetrics>,
}

impl<S: KvStore> RefDataStore<S> {
    /// Open a store over `kv`, checking `config` against the persisted
    /// metadata (hash width, format version) or recording it on first open.
    pub fn open(kv: S, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        if config.max_key_length > kv.max_key_length() {
            return Err(StoreError::ConfigMismatch(format!(
                "max_key_length {} exceeds the backend limit of {}",
                config.max_key_length,
                kv.max_key_length()
            )));
        }

        let metrics = Arc::new(StoreMetrics::new());
        let store = Self {
            lookups: LookupTables::new(&config, &metrics),
            values: ValueStore::new(&config, Arc::clone(&metrics)),
            pool: BufferPool::new(config.buffer_pool_capacity),
            kv,
            config,
            metrics,
        };
        store.check_metadata()?;
        tracing::info!(
            "Opened reference data store (hash width {}, direct threshold {}, max key {})",
            store.config.hash_length.width(),
            store.config.direct_key_threshold,
            store.config.max_key_length
        );
        Ok(store)
    }

    fn check_metadata(&self) -> Result<()> {
        let mut txn = self.kv.write_txn()?;
        let width = self.config.hash_length.width() as u8;

        match txn.get(META, META_HASH_WIDTH)? {
            Some(stored) => {
                let stored = u8::read_at(stored, 0)?;
                if stored != width {
                    let stored_len = HashLength::from_width(stored)
                        .map_or_else(|| format!("{} bytes", stored), |l| format!("{:?}", l));
                    return Err(StoreError::ConfigMismatch(format!(
                        "store was created with hash length {}, configured {:?}",
                        stored_len, self.config.hash_length
                    )));
                }
            }
            None => txn.put(META, META_HASH_WIDTH, &[width])?,
        }

        match txn.get(META, META_FORMAT_VERSION)? {
            Some(stored) => {
                let stored = u16::read_at(stored, 0)?;
                if stored != FORMAT_VERSION {
                    return Err(StoreError::ConfigMismatch(format!(
                        "store format version {}, this build reads {}",
                        stored, FORMAT_VERSION
                    )));
                }
            }
            None => txn.put(META, META_FORMAT_VERSION, &FORMAT_VERSION.to_be_bytes())?,
        }
        txn.commit()
    }

    /// Replace the content hash of the key hash table and the value store.
    ///
    /// The hasher's length must equal the configured one.
    pub fn with_content_hasher(mut self, hasher: ContentHasher) -> Self {
        self.lookups.keys_hash =
            HashLookupTable::new(schema::KEYS_HASH, &self.config, Arc::clone(&self.metrics))
                .with_hasher(hasher);
        self.values = ValueStore::new(&self.config, Arc::clone(&self.metrics)).with_hasher(hasher);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn kv(&self) -> &S {
        &self.kv
    }

    /// Close the store, handing back the backend.
    pub fn into_kv(self) -> S {
        self.kv
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub(crate) fn prefix_codec(&self) -> KeyPrefixCodec<'_> {
        KeyPrefixCodec {
            variable: VariableKeyCodec::new(
                &self.lookups.keys_uid,
                &self.lookups.keys_hash,
                self.config.direct_key_threshold,
                self.config.max_key_length,
            ),
            tags: TagsCodec::new(&self.lookups.tag_names, &self.lookups.tag_values),
        }
    }

    pub(crate) fn definitions(&self) -> DefinitionCodec<'_> {
        DefinitionCodec::new(&self.lookups.map_defs, &self.lookups.stream_parts)
    }

    // ── Write helpers (shared with the loader) ──────────────────────────

    /// Stream key for `def`, creating a COMPLETE ProcessingInfo if the
    /// stream has none yet.
    fn ensure_stream<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        def: &RefStreamDefinition,
    ) -> Result<RefStreamKey> {
        let stream_key = self.definitions().stream_key_for_put(txn, def)?;
        let key_bytes = stream_key.to_key_bytes();
        if txn.get(PROCESSING_INFO, &key_bytes)?.is_none() {
            let now = now_ms();
            let info = ProcessingInfo::new(now, now, ProcessingState::Complete);
            txn.put(PROCESSING_INFO, &key_bytes, &info.encode())?;
        }
        Ok(stream_key)
    }

    pub(crate) fn put_entry<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        map_uid: Uid,
        prefix: &KeyPrefix,
        value: &TypedValue,
    ) -> Result<PutOutcome> {
        let mut key = self.pool.checkout();
        map_uid.put(&mut key);
        self.prefix_codec().encode_for_put(txn, prefix, &mut key)?;
        self.bind_value(txn, KEY_VALUE, &key, value)
    }

    pub(crate) fn put_range_entry<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        map_uid: Uid,
        range: ValueRange,
        value: &TypedValue,
    ) -> Result<PutOutcome> {
        let key = RangeKey { map_uid, range }.to_key_bytes();
        self.bind_value(txn, RANGE_VALUE, &key, value)
    }

    /// Point `key` in `table` at `value`, keeping reference counts exact.
    fn bind_value<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        table: Table,
        key: &[u8],
        value: &TypedValue,
    ) -> Result<PutOutcome> {
        let existing = match txn.get(table, key)? {
            Some(bytes) => Some(self.values.parse_key(bytes)?),
            None => None,
        };
        match existing {
            Some(_) if !self.config.overwrite_existing => {
                tracing::trace!("{}: entry exists, overwrite disabled", table.name());
                Ok(PutOutcome::Ignored)
            }
            Some(old) => {
                if self.values.find(&*txn, value)? == Some(old) {
                    return Ok(PutOutcome::Unchanged);
                }
                let new = self.values.get_or_create(txn, value, &self.pool)?;
                txn.put(table, key, new.as_bytes())?;
                self.values.de_reference_or_delete(txn, &old, &self.pool)?;
                Ok(PutOutcome::Replaced)
            }
            None => {
                let new = self.values.get_or_create(txn, value, &self.pool)?;
                txn.put(table, key, new.as_bytes())?;
                Ok(PutOutcome::Inserted)
            }
        }
    }

    // ── Read helpers ────────────────────────────────────────────────────

    fn map_uid_for_get<R: KvRead + ?Sized>(&self, txn: &R, map: &MapDefinition) -> Result<Option<Uid>> {
        let defs = self.definitions();
        match defs.stream_key_for_get(txn, &map.stream)? {
            Some(stream_key) => defs.map_uid_for_get(txn, &stream_key, &map.map_name),
            None => Ok(None),
        }
    }

    /// Encoded key-value key for `key`, if every part of it was interned.
    fn entry_key_for_get<R: KvRead + ?Sized>(
        &self,
        txn: &R,
        map_uid: Uid,
        prefix: &KeyPrefix,
    ) -> Result<Option<Vec<u8>>> {
        let mut out = self.pool.checkout();
        map_uid.put(&mut out);
        if !self.prefix_codec().encode_for_get(txn, prefix, &mut out)? {
            return Ok(None);
        }
        // Could never have been stored.
        if out.len() > self.config.max_key_length {
            return Ok(None);
        }
        Ok(Some(out.to_vec()))
    }

    /// Value-store key bound to `key`: exact entry first, then a range
    /// containing an integer-like key.
    fn locate_value<R: KvRead + ?Sized>(&self, txn: &R, key: &CompositeKey) -> Result<Option<HashLookupKey>> {
        let Some(map_uid) = self.map_uid_for_get(txn, &key.map)? else {
            return Ok(None);
        };
        if let Some(entry_key) = self.entry_key_for_get(txn, map_uid, &key.prefix)? {
            if let Some(bytes) = txn.get(KEY_VALUE, &entry_key)? {
                return Ok(Some(self.values.parse_key(bytes)?));
            }
        }
        match key.prefix.range_point() {
            Some(point) => self.find_range(txn, map_uid, point),
            None => Ok(None),
        }
    }

    /// Range entry containing `point`; among overlapping ranges the one with
    /// the greatest start wins.
    ///
    /// Walks backwards from `(map_uid, point, i64::MAX)`, so the first range
    /// that contains the point is the answer.
    fn find_range<R: KvRead + ?Sized>(
        &self,
        txn: &R,
        map_uid: Uid,
        point: i64,
    ) -> Result<Option<HashLookupKey>> {
        let prefix = map_uid.to_bytes();
        let mut last = Vec::with_capacity(RangeKey::WIDTH);
        map_uid.write_key(&mut last);
        OrderedI64(point).write_key(&mut last);
        OrderedI64(i64::MAX).write_key(&mut last);

        for item in txn.scan_rev(RANGE_VALUE, &prefix, &last)? {
            let (key, value) = item?;
            let range_key = RangeKey::from_key_bytes(key)?;
            if range_key.range.contains(point) {
                return Ok(Some(self.values.parse_key(value)?));
            }
        }
        Ok(None)
    }

    fn dangling(value_key: &HashLookupKey) -> StoreError {
        StoreError::corruption(format!("entry references missing value {:?}", value_key))
    }

    // ── Public API ──────────────────────────────────────────────────────

    pub fn put(&self, key: &CompositeKey, value: &TypedValue) -> Result<PutOutcome> {
        let mut txn = self.kv.write_txn()?;
        let stream_key = self.ensure_stream(&mut txn, &key.map.stream)?;
        let map_uid = self
            .definitions()
            .map_uid_for_put(&mut txn, &stream_key, &key.map.map_name)?;
        let outcome = self.put_entry(&mut txn, map_uid, &key.prefix, value)?;
        txn.commit()?;
        Ok(outcome)
    }

    pub fn put_range(
        &self,
        map: &MapDefinition,
        range: ValueRange,
        value: &TypedValue,
    ) -> Result<PutOutcome> {
        let mut txn = self.kv.write_txn()?;
        let stream_key = self.ensure_stream(&mut txn, &map.stream)?;
        let map_uid = self
            .definitions()
            .map_uid_for_put(&mut txn, &stream_key, &map.map_name)?;
        let outcome = self.put_range_entry(&mut txn, map_uid, range, value)?;
        txn.commit()?;
        Ok(outcome)
    }

    pub fn get(&self, key: &CompositeKey) -> Result<Option<TypedValue>> {
        let txn = self.kv.read_txn()?;
        let Some(value_key) = self.locate_value(&txn, key)? else {
            return Ok(None);
        };
        match self.values.get(&txn, &value_key)? {
            Some(value) => Ok(Some(value)),
            None => Err(Self::dangling(&value_key)),
        }
    }

    /// Like [`get`](Self::get) but leaves the payload undecoded.
    pub fn get_raw(&self, key: &CompositeKey) -> Result<Option<RawValue>> {
        let txn = self.kv.read_txn()?;
        let Some(value_key) = self.locate_value(&txn, key)? else {
            return Ok(None);
        };
        match self.values.get_raw(&txn, &value_key)? {
            Some(raw) => Ok(Some(raw)),
            None => Err(Self::dangling(&value_key)),
        }
    }

    /// Reference count of the value currently bound to `key`.
    pub fn value_reference_count(&self, key: &CompositeKey) -> Result<Option<i32>> {
        let txn = self.kv.read_txn()?;
        match self.locate_value(&txn, key)? {
            Some(value_key) => self.values.reference_count(&txn, &value_key),
            None => Ok(None),
        }
    }

    /// Remove an exact key/value entry. Range entries are not affected.
    pub fn delete(&self, key: &CompositeKey) -> Result<bool> {
        let mut txn = self.kv.write_txn()?;
        let Some(map_uid) = self.map_uid_for_get(&txn, &key.map)? else {
            return Ok(false);
        };
        let Some(entry_key) = self.entry_key_for_get(&txn, map_uid, &key.prefix)? else {
            return Ok(false);
        };
        let value_key = match txn.get(KEY_VALUE, &entry_key)? {
            Some(bytes) => self.values.parse_key(bytes)?,
            None => return Ok(false),
        };
        txn.delete(KEY_VALUE, &entry_key)?;
        self.values
            .de_reference_or_delete(&mut txn, &value_key, &self.pool)?;
        txn.commit()?;
        Ok(true)
    }

    pub fn delete_range(&self, map: &MapDefinition, range: ValueRange) -> Result<bool> {
        let mut txn = self.kv.write_txn()?;
        let Some(map_uid) = self.map_uid_for_get(&txn, map)? else {
            return Ok(false);
        };
        let key = RangeKey { map_uid, range }.to_key_bytes();
        let value_key = match txn.get(RANGE_VALUE, &key)? {
            Some(bytes) => self.values.parse_key(bytes)?,
            None => return Ok(false),
        };
        txn.delete(RANGE_VALUE, &key)?;
        self.values
            .de_reference_or_delete(&mut txn, &value_key, &self.pool)?;
        txn.commit()?;
        Ok(true)
    }

    /// Bind `to` to the value currently bound to `from`, sharing the stored
    /// record. None if `from` has no value.
    pub fn copy_entry(&self, from: &CompositeKey, to: &CompositeKey) -> Result<Option<PutOutcome>> {
        let mut txn = self.kv.write_txn()?;
        let Some(source) = self.locate_value(&txn, from)? else {
            return Ok(None);
        };
        let stream_key = self.ensure_stream(&mut txn, &to.map.stream)?;
        let map_uid = self
            .definitions()
            .map_uid_for_put(&mut txn, &stream_key, &to.map.map_name)?;
        let mut key = self.pool.checkout();
        map_uid.put(&mut key);
        self.prefix_codec().encode_for_put(&mut txn, &to.prefix, &mut key)?;

        let existing = match txn.get(KEY_VALUE, &key)? {
            Some(bytes) => Some(self.values.parse_key(bytes)?),
            None => None,
        };
        let outcome = match existing {
            Some(_) if !self.config.overwrite_existing => PutOutcome::Ignored,
            Some(old) if self.values.are_values_equal(&txn, &old, &source)? => PutOutcome::Unchanged,
            Some(old) => {
                let shared = self.values.clone_reference(&mut txn, &source, &self.pool)?;
                txn.put(KEY_VALUE, &key, shared.as_bytes())?;
                self.values.de_reference_or_delete(&mut txn, &old, &self.pool)?;
                PutOutcome::Replaced
            }
            None => {
                let shared = self.values.clone_reference(&mut txn, &source, &self.pool)?;
                txn.put(KEY_VALUE, &key, shared.as_bytes())?;
                PutOutcome::Inserted
            }
        };
        txn.commit()?;
        Ok(Some(outcome))
    }

    /// Whether two keys are bound to equal values. Unbound keys are never equal.
    pub fn values_equal(&self, a: &CompositeKey, b: &CompositeKey) -> Result<bool> {
        let txn = self.kv.read_txn()?;
        match (self.locate_value(&txn, a)?, self.locate_value(&txn, b)?) {
            (Some(a), Some(b)) => self.values.are_values_equal(&txn, &a, &b),
            _ => Ok(false),
        }
    }

    // ── Processing info ─────────────────────────────────────────────────

    /// Rewrite one stream's ProcessingInfo in place. False if it has none.
    fn modify_processing_info<F>(&self, def: &RefStreamDefinition, modify: F) -> Result<bool>
    where
        F: FnOnce(&mut [u8]) -> Result<()>,
    {
        let mut txn = self.kv.write_txn()?;
        let Some(stream_key) = self.definitions().stream_key_for_get(&txn, def)? else {
            return Ok(false);
        };
        let key_bytes = stream_key.to_key_bytes();
        let mut info = self.pool.checkout();
        match txn.get(PROCESSING_INFO, &key_bytes)? {
            Some(stored) => info.extend_from_slice(stored),
            None => return Ok(false),
        }
        modify(&mut info[..])?;
        txn.put(PROCESSING_INFO, &key_bytes, &info)?;
        txn.commit()?;
        Ok(true)
    }

    /// Touch the stream owning `key`.
    pub fn update_last_accessed(&self, key: &CompositeKey) -> Result<bool> {
        self.update_last_accessed_at(&key.map.stream, now_ms())
    }

    pub fn update_last_accessed_at(&self, def: &RefStreamDefinition, time_ms: i64) -> Result<bool> {
        self.modify_processing_info(def, |info| {
            processing_info::write_last_accessed(info, time_ms)
        })
    }

    pub fn set_processing_state(&self, def: &RefStreamDefinition, state: ProcessingState) -> Result<bool> {
        self.modify_processing_info(def, |info| processing_info::write_state(info, state))
    }

    pub fn get_processing_info(&self, def: &RefStreamDefinition) -> Result<Option<ProcessingInfo>> {
        let txn = self.kv.read_txn()?;
        let Some(stream_key) = self.definitions().stream_key_for_get(&txn, def)? else {
            return Ok(None);
        };
        match txn.get(PROCESSING_INFO, &stream_key.to_key_bytes())? {
            Some(bytes) => Ok(Some(ProcessingInfo::decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// True once a load of `def` has completed.
    pub fn is_loaded(&self, def: &RefStreamDefinition) -> Result<bool> {
        Ok(self
            .get_processing_info(def)?
            .map_or(false, |info| info.state == ProcessingState::Complete))
    }

    /// Every stream with its ProcessingInfo, in key order.
    pub fn list_ref_streams(&self) -> Result<Vec<(RefStreamDefinition, ProcessingInfo)>> {
        let txn = self.kv.read_txn()?;
        let defs = self.definitions();
        let mut streams = Vec::new();
        for item in txn.scan(PROCESSING_INFO, KeyRange::All)? {
            let (key, value) = item?;
            let stream_key = RefStreamKey::from_key_bytes(key)?;
            streams.push((defs.resolve_stream(&txn, &stream_key)?, ProcessingInfo::decode(value)?));
        }
        Ok(streams)
    }

    /// Number of entries in every table.
    pub fn entry_counts(&self) -> Result<BTreeMap<&'static str, usize>> {
        let txn = self.kv.read_txn()?;
        let mut counts = BTreeMap::new();
        for table in schema::all_tables() {
            counts.insert(table.name(), txn.count(table)?);
        }
        Ok(counts)
    }
}

#[cfg(feature = "lmdb")]
impl RefDataStore<crate::kv::LmdbKvStore> {
    /// Open (or create) an LMDB-backed store in `dir`.
    ///
    /// Uses `store_config.json` from `dir` when present, otherwise writes the
    /// defaults there so later opens agree.
    pub fn open_dir(dir: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let config = match StoreConfig::read_from(dir)? {
            Some(config) => config,
            None => {
                let config = StoreConfig::default();
                config.write_to(dir)?;
                config
            }
        };
        let kv = crate::kv::LmdbKvStore::open(dir, &config)?;
        Self::open(kv, config)
    }
}
