//! Reference-counted, content-addressed value store.
//!
//! Values are deduplicated: equal values share one [`value_record`] keyed by
//! a hash lookup id, and every key/value or range entry pointing at it holds
//! one reference. The hash input is the encoded typed value, so values of
//! different types never compare equal.
//!
//! [`value_record`]: crate::record::value_record

use std::sync::Arc;

use crate::buffer_pool::BufferPool;
use crate::codec::value::{RawValue, TypedValue};
use crate::config::{HashLength, StoreConfig};
use crate::error::{Result, StoreError};
use crate::kv::{KvRead, KvWrite};
use crate::lookup::hash::{claim, probe, ContentHasher, HashLookupKey, Probe};
use crate::metrics::StoreMetrics;
use crate::record::value_record::{self, ValueRecordRef};
use crate::schema::VALUE_STORE;

pub struct ValueStore {
    hasher: ContentHasher,
    max_probes: usize,
    metrics: Arc<StoreMetrics>,
}

impl ValueStore {
    pub fn new(config: &StoreConfig, metrics: Arc<StoreMetrics>) -> Self {
        Self {
            hasher: ContentHasher::new(config.hash_length),
            max_probes: config.max_hash_clash_probes,
            metrics,
        }
    }

    pub fn with_hasher(mut self, hasher: ContentHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn hash_length(&self) -> HashLength {
        self.hasher.length()
    }

    pub fn parse_key(&self, bytes: &[u8]) -> Result<HashLookupKey> {
        HashLookupKey::from_bytes(bytes, self.hasher.length())
    }

    fn bucket(&self, value: &TypedValue) -> Vec<u8> {
        self.hasher.hash(&value.encode())[..self.hasher.length().width()].to_vec()
    }

    /// Key of the record holding `value`, without touching counts.
    pub fn find<R: KvRead + ?Sized>(&self, txn: &R, value: &TypedValue) -> Result<Option<HashLookupKey>> {
        let hash = self.bucket(value);
        let mut payload = Vec::new();
        value.encode_payload(&mut payload);
        let tag = value.type_tag();
        match probe(txn, VALUE_STORE, &hash, |stored| {
            ValueRecordRef::parse(stored).map_or(false, |rec| rec.holds(tag, &payload))
        })? {
            Probe::Found(key) => Ok(Some(key)),
            Probe::Vacant { .. } => Ok(None),
        }
    }

    /// Take one reference to `value`, storing it if no equal value exists.
    pub fn get_or_create<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        value: &TypedValue,
        pool: &BufferPool,
    ) -> Result<HashLookupKey> {
        let hash = self.bucket(value);
        let mut payload = pool.checkout();
        value.encode_payload(&mut payload);
        let tag = value.type_tag();

        let found = probe(&*txn, VALUE_STORE, &hash, |stored| {
            ValueRecordRef::parse(stored).map_or(false, |rec| rec.holds(tag, &payload))
        })?;
        match found {
            Probe::Found(key) => {
                self.add_reference(txn, &key, 1, pool)?;
                Ok(key)
            }
            Probe::Vacant { next, occupied } => {
                let key = claim(&hash, next, self.max_probes)?;
                if occupied > 0 {
                    self.metrics.record_hash_clash();
                    tracing::debug!("value store: hash clash, using ordinal {}", key.ordinal());
                }
                let mut record = pool.checkout();
                value_record::encode(value, 1, &mut record);
                txn.put(VALUE_STORE, key.as_bytes(), &record)?;
                self.metrics.record_value_created();
                tracing::trace!("value store: created {:?} ({:?})", key, tag);
                Ok(key)
            }
        }
    }

    /// Read-modify-write of the count through a pooled copy of the record.
    fn add_reference<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        key: &HashLookupKey,
        delta: i32,
        pool: &BufferPool,
    ) -> Result<Option<i32>> {
        let mut record = pool.checkout();
        match txn.get(VALUE_STORE, key.as_bytes())? {
            Some(stored) => record.extend_from_slice(stored),
            None => return Ok(None),
        }
        let count = value_record::update_reference_count(&mut record, delta)?;
        if count <= 0 {
            txn.delete(VALUE_STORE, key.as_bytes())?;
        } else {
            txn.put(VALUE_STORE, key.as_bytes(), &record)?;
        }
        Ok(Some(count))
    }

    pub fn get<R: KvRead + ?Sized>(&self, txn: &R, key: &HashLookupKey) -> Result<Option<TypedValue>> {
        match txn.get(VALUE_STORE, key.as_bytes())? {
            Some(record) => Ok(Some(ValueRecordRef::parse(record)?.value()?)),
            None => Ok(None),
        }
    }

    /// Tag and payload without decoding the payload.
    pub fn get_raw<R: KvRead + ?Sized>(&self, txn: &R, key: &HashLookupKey) -> Result<Option<RawValue>> {
        match txn.get(VALUE_STORE, key.as_bytes())? {
            Some(record) => Ok(Some(ValueRecordRef::parse(record)?.to_raw())),
            None => Ok(None),
        }
    }

    pub fn reference_count<R: KvRead + ?Sized>(&self, txn: &R, key: &HashLookupKey) -> Result<Option<i32>> {
        match txn.get(VALUE_STORE, key.as_bytes())? {
            Some(record) => Ok(Some(ValueRecordRef::parse(record)?.ref_count)),
            None => Ok(None),
        }
    }

    /// Drop one reference; the record is deleted when none remain.
    ///
    /// Returns true if the record was deleted. A missing record is logged
    /// and treated as already deleted.
    pub fn de_reference_or_delete<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        key: &HashLookupKey,
        pool: &BufferPool,
    ) -> Result<bool> {
        match self.add_reference(txn, key, -1, pool)? {
            Some(count) => {
                let deleted = count <= 0;
                self.metrics.record_value_dereferenced(deleted);
                Ok(deleted)
            }
            None => {
                tracing::warn!("value store: de-reference of missing value {:?}", key);
                Ok(false)
            }
        }
    }

    /// Take an additional reference to an existing record.
    ///
    /// Values are immutable and shared, so a clone is the same key with one
    /// more reference; no bytes are copied.
    pub fn clone_reference<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        key: &HashLookupKey,
        pool: &BufferPool,
    ) -> Result<HashLookupKey> {
        match self.add_reference(txn, key, 1, pool)? {
            Some(_) => Ok(*key),
            None => Err(StoreError::KeyNotFound(format!("value {:?}", key))),
        }
    }

    /// Whether two keys hold equal values. Missing keys are never equal.
    pub fn are_values_equal<R: KvRead + ?Sized>(
        &self,
        txn: &R,
        a: &HashLookupKey,
        b: &HashLookupKey,
    ) -> Result<bool> {
        if a == b {
            return Ok(txn.get(VALUE_STORE, a.as_bytes())?.is_some());
        }
        let (Some(rec_a), Some(rec_b)) = (
            txn.get(VALUE_STORE, a.as_bytes())?,
            txn.get(VALUE_STORE, b.as_bytes())?,
        ) else {
            return Ok(false);
        };
        let rec_a = ValueRecordRef::parse(rec_a)?;
        let rec_b = ValueRecordRef::parse(rec_b)?;
        Ok(rec_a.holds(rec_b.type_tag, rec_b.payload))
    }

    pub fn len<R: KvRead + ?Sized>(&self, txn: &R) -> Result<usize> {
        txn.count(VALUE_STORE)
    }
}
