//! Hash lookup table: content hash + ordinal -> byte sequence.
//!
//! ```text
//! key:   hash[width] ‖ ordinal u16 BE     width = 4 | 8 | 16
//! value: the full byte sequence
//! ```
//!
//! The hash only selects a bucket; equality is always decided by comparing
//! the stored bytes. Values whose hashes clash get successive ordinals. A new
//! value takes the lowest free ordinal, so gaps left by purge are reused.

use std::fmt;
use std::sync::Arc;

use crate::config::{HashLength, StoreConfig};
use crate::error::{Result, StoreError};
use crate::kv::{KeyRange, KvRead, KvWrite, Table};
use crate::metrics::StoreMetrics;
use crate::schema::HashTableSpec;

pub const ORDINAL_WIDTH: usize = 2;

const MAX_HASH_WIDTH: usize = 16;

/// Identifier of an entry in a hash lookup table (or the value store).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashLookupKey {
    bytes: [u8; MAX_HASH_WIDTH + ORDINAL_WIDTH],
    len: u8,
}

impl HashLookupKey {
    /// `hash` is truncated to 16 bytes.
    pub fn new(hash: &[u8], ordinal: u16) -> Self {
        let width = hash.len().min(MAX_HASH_WIDTH);
        let mut bytes = [0u8; MAX_HASH_WIDTH + ORDINAL_WIDTH];
        bytes[..width].copy_from_slice(&hash[..width]);
        bytes[width..width + ORDINAL_WIDTH].copy_from_slice(&ordinal.to_be_bytes());
        Self {
            bytes,
            len: (width + ORDINAL_WIDTH) as u8,
        }
    }

    /// Encoded size for a configured hash width.
    pub fn encoded_len(length: HashLength) -> usize {
        length.width() + ORDINAL_WIDTH
    }

    pub fn from_bytes(bytes: &[u8], length: HashLength) -> Result<Self> {
        let expected = Self::encoded_len(length);
        if bytes.len() != expected {
            return Err(StoreError::corruption(format!(
                "hash lookup key of {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }
        let width = length.width();
        let ordinal = u16::from_be_bytes([bytes[width], bytes[width + 1]]);
        Ok(Self::new(&bytes[..width], ordinal))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn hash(&self) -> &[u8] {
        &self.bytes[..self.len as usize - ORDINAL_WIDTH]
    }

    pub fn ordinal(&self) -> u16 {
        let at = self.len as usize - ORDINAL_WIDTH;
        u16::from_be_bytes([self.bytes[at], self.bytes[at + 1]])
    }
}

impl fmt::Debug for HashLookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashLookupKey(")?;
        for b in self.hash() {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "#{})", self.ordinal())
    }
}

/// Content hash truncated to the configured width.
#[derive(Clone, Copy)]
pub struct ContentHasher {
    length: HashLength,
    hash_fn: fn(&[u8]) -> [u8; 32],
}

fn blake3_hash(value: &[u8]) -> [u8; 32] {
    *blake3::hash(value).as_bytes()
}

impl ContentHasher {
    pub fn new(length: HashLength) -> Self {
        Self {
            length,
            hash_fn: blake3_hash,
        }
    }

    /// Replace the hash function, e.g. with a constant one to force clashes.
    pub fn with_hash_fn(length: HashLength, hash_fn: fn(&[u8]) -> [u8; 32]) -> Self {
        Self { length, hash_fn }
    }

    pub fn length(&self) -> HashLength {
        self.length
    }

    /// Hash of `value`; only the first `length.width()` bytes are meaningful.
    pub fn hash(&self, value: &[u8]) -> [u8; 32] {
        (self.hash_fn)(value)
    }
}

impl fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentHasher")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Result of probing one hash bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    /// An entry with equal content exists.
    Found(HashLookupKey),
    /// No equal entry; `next` is the lowest free ordinal, `occupied` the
    /// number of other entries sharing the hash.
    Vacant { next: u32, occupied: usize },
}

/// Key for a new entry at ordinal `next`, if the chain has room.
pub(crate) fn claim(hash: &[u8], next: u32, max_probes: usize) -> Result<HashLookupKey> {
    if next as usize >= max_probes || next > u32::from(u16::MAX) {
        return Err(StoreError::HashCollisionChainExhausted { probes: max_probes });
    }
    Ok(HashLookupKey::new(hash, next as u16))
}

/// Scan the bucket of `hash` in `table`, deciding equality with `matches`
/// applied to each stored value.
pub(crate) fn probe<R, F>(txn: &R, table: Table, hash: &[u8], mut matches: F) -> Result<Probe>
where
    R: KvRead + ?Sized,
    F: FnMut(&[u8]) -> bool,
{
    let mut expected: u32 = 0;
    let mut first_gap: Option<u32> = None;
    let mut occupied = 0usize;

    for item in txn.scan(table, KeyRange::Prefix(hash))? {
        let (key, value) = item?;
        if key.len() != hash.len() + ORDINAL_WIDTH {
            return Err(StoreError::corruption(format!(
                "hash bucket key of {} bytes in '{}'",
                key.len(),
                table.name()
            )));
        }
        let ordinal = u16::from_be_bytes([key[hash.len()], key[hash.len() + 1]]);
        if matches(value) {
            return Ok(Probe::Found(HashLookupKey::new(hash, ordinal)));
        }
        occupied += 1;
        if first_gap.is_none() {
            if u32::from(ordinal) != expected {
                first_gap = Some(expected);
            } else {
                expected += 1;
            }
        }
    }

    Ok(Probe::Vacant {
        next: first_gap.unwrap_or(expected),
        occupied,
    })
}

pub struct HashLookupTable {
    spec: HashTableSpec,
    hasher: ContentHasher,
    max_probes: usize,
    metrics: Arc<StoreMetrics>,
}

impl HashLookupTable {
    pub fn new(spec: HashTableSpec, config: &StoreConfig, metrics: Arc<StoreMetrics>) -> Self {
        Self {
            spec,
            hasher: ContentHasher::new(config.hash_length),
            max_probes: config.max_hash_clash_probes,
            metrics,
        }
    }

    pub fn with_hasher(mut self, hasher: ContentHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn spec(&self) -> &HashTableSpec {
        &self.spec
    }

    pub fn hash_length(&self) -> HashLength {
        self.hasher.length()
    }

    fn bucket(&self, value: &[u8]) -> Vec<u8> {
        self.hasher.hash(value)[..self.hasher.length().width()].to_vec()
    }

    /// Id of an entry holding exactly `value`, without inserting.
    pub fn get<R: KvRead + ?Sized>(&self, txn: &R, value: &[u8]) -> Result<Option<HashLookupKey>> {
        let hash = self.bucket(value);
        match probe(txn, self.spec.entries, &hash, |stored| stored == value)? {
            Probe::Found(key) => Ok(Some(key)),
            Probe::Vacant { .. } => Ok(None),
        }
    }

    pub fn get_or_create<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        value: &[u8],
    ) -> Result<HashLookupKey> {
        let hash = self.bucket(value);
        match probe(&*txn, self.spec.entries, &hash, |stored| stored == value)? {
            Probe::Found(key) => Ok(key),
            Probe::Vacant { next, occupied } => {
                let next = claim(&hash, next, self.max_probes)?;
                if occupied > 0 {
                    self.metrics.record_hash_clash();
                    tracing::debug!(
                        "{}: hash clash, {} entries share bucket, using ordinal {}",
                        self.spec.name,
                        occupied,
                        next.ordinal()
                    );
                }
                txn.put(self.spec.entries, next.as_bytes(), value)?;
                self.metrics.record_hash_entry_created();
                Ok(next)
            }
        }
    }

    /// Bytes behind an id referenced from live data. A miss is corruption.
    pub fn resolve<'t, R: KvRead + ?Sized>(
        &self,
        txn: &'t R,
        key: &HashLookupKey,
    ) -> Result<&'t [u8]> {
        self.try_resolve(txn, key)?.ok_or_else(|| {
            StoreError::corruption(format!("{:?} missing from '{}'", key, self.spec.name))
        })
    }

    pub fn try_resolve<'t, R: KvRead + ?Sized>(
        &self,
        txn: &'t R,
        key: &HashLookupKey,
    ) -> Result<Option<&'t [u8]>> {
        txn.get(self.spec.entries, key.as_bytes())
    }

    pub fn delete<W: KvWrite + ?Sized>(&self, txn: &mut W, key: &HashLookupKey) -> Result<bool> {
        txn.delete(self.spec.entries, key.as_bytes())
    }

    pub fn len<R: KvRead + ?Sized>(&self, txn: &R) -> Result<usize> {
        txn.count(self.spec.entries)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryKvStore};
    use crate::schema::KEYS_HASH;

    /// Every value lands in the same bucket.
    pub(crate) fn constant_hash(_: &[u8]) -> [u8; 32] {
        [7u8; 32]
    }

    fn table(hasher: Option<ContentHasher>) -> HashLookupTable {
        let t = HashLookupTable::new(KEYS_HASH, &StoreConfig::default(), Arc::new(StoreMetrics::new()));
        match hasher {
            Some(h) => t.with_hasher(h),
            None => t,
        }
    }

    #[test]
    fn test_key_layout() {
        let key = HashLookupKey::new(&[1, 2, 3, 4], 0x0102);
        assert_eq!(key.as_bytes(), &[1, 2, 3, 4, 1, 2]);
        assert_eq!(key.hash(), &[1, 2, 3, 4]);
        assert_eq!(key.ordinal(), 0x0102);
        let parsed = HashLookupKey::from_bytes(key.as_bytes(), HashLength::Integer).unwrap();
        assert_eq!(parsed, key);
        assert!(HashLookupKey::from_bytes(key.as_bytes(), HashLength::Long).is_err());
    }

    #[test]
    fn test_same_value_same_id() {
        let store = MemoryKvStore::default();
        let hashes = table(None);
        let big = vec![0xABu8; 2000];
        let mut txn = store.write_txn().unwrap();
        let a = hashes.get_or_create(&mut txn, &big).unwrap();
        let b = hashes.get_or_create(&mut txn, &big).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.ordinal(), 0);
        assert_eq!(a.as_bytes().len(), 8 + ORDINAL_WIDTH);
        assert_eq!(hashes.len(&txn).unwrap(), 1);
        assert_eq!(hashes.get(&txn, &big).unwrap(), Some(a));
        assert_eq!(hashes.get(&txn, b"other").unwrap(), None);
    }

    #[test]
    fn test_forced_collisions_get_distinct_ordinals() {
        let store = MemoryKvStore::default();
        let hashes = table(Some(ContentHasher::with_hash_fn(HashLength::Long, constant_hash)));
        let mut txn = store.write_txn().unwrap();
        let a = hashes.get_or_create(&mut txn, b"first").unwrap();
        let b = hashes.get_or_create(&mut txn, b"second").unwrap();
        let c = hashes.get_or_create(&mut txn, b"third").unwrap();
        assert_eq!((a.ordinal(), b.ordinal(), c.ordinal()), (0, 1, 2));
        assert_eq!(a.hash(), b.hash());

        assert_eq!(hashes.resolve(&txn, &a).unwrap(), b"first");
        assert_eq!(hashes.resolve(&txn, &b).unwrap(), b"second");
        assert_eq!(hashes.get(&txn, b"third").unwrap(), Some(c));
        assert_eq!(hashes.get_or_create(&mut txn, b"second").unwrap(), b);
    }

    #[test]
    fn test_gap_is_reused() {
        let store = MemoryKvStore::default();
        let hashes = table(Some(ContentHasher::with_hash_fn(HashLength::Long, constant_hash)));
        let mut txn = store.write_txn().unwrap();
        let a = hashes.get_or_create(&mut txn, b"a").unwrap();
        let b = hashes.get_or_create(&mut txn, b"b").unwrap();
        let c = hashes.get_or_create(&mut txn, b"c").unwrap();
        assert!(hashes.delete(&mut txn, &b).unwrap());

        // Entries after the gap are still found.
        assert_eq!(hashes.get(&txn, b"c").unwrap(), Some(c));
        let d = hashes.get_or_create(&mut txn, b"d").unwrap();
        assert_eq!(d.ordinal(), 1, "lowest free ordinal is reused");
        assert_eq!(hashes.resolve(&txn, &a).unwrap(), b"a");
    }

    #[test]
    fn test_chain_exhausted() {
        let store = MemoryKvStore::default();
        let config = StoreConfig {
            max_hash_clash_probes: 2,
            ..StoreConfig::default()
        };
        let hashes = HashLookupTable::new(KEYS_HASH, &config, Arc::new(StoreMetrics::new()))
            .with_hasher(ContentHasher::with_hash_fn(HashLength::Long, constant_hash));
        let mut txn = store.write_txn().unwrap();
        hashes.get_or_create(&mut txn, b"a").unwrap();
        hashes.get_or_create(&mut txn, b"b").unwrap();
        let err = hashes.get_or_create(&mut txn, b"c").unwrap_err();
        assert!(matches!(err, StoreError::HashCollisionChainExhausted { probes: 2 }));
        // Existing values are still found once the chain is full.
        assert_eq!(hashes.get_or_create(&mut txn, b"b").unwrap().ordinal(), 1);
    }

    #[test]
    fn test_clash_metrics() {
        let store = MemoryKvStore::default();
        let metrics = Arc::new(StoreMetrics::new());
        let hashes = HashLookupTable::new(KEYS_HASH, &StoreConfig::default(), Arc::clone(&metrics))
            .with_hasher(ContentHasher::with_hash_fn(HashLength::Integer, constant_hash));
        let mut txn = store.write_txn().unwrap();
        hashes.get_or_create(&mut txn, b"x").unwrap();
        hashes.get_or_create(&mut txn, b"y").unwrap();
        let snap = metrics.snapshot();
        assert_eq!(snap.hash_entries_created, 2);
        assert_eq!(snap.hash_clashes, 1);
    }
}
