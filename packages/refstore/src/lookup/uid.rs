//! UID lookup table: byte sequence <-> sequential u32.
//!
//! ```text
//! <name>-fwd   value bytes  -> uid (4 bytes BE)
//! <name>-rev   uid          -> value bytes
//! meta         uid-counter:<name> -> next uid (4 bytes BE)
//! ```
//!
//! UIDs are handed out in insertion order starting at 0 and are never reused
//! while the counter lives, even after purge removes an entry.

use std::fmt;
use std::sync::Arc;

use crate::codec::cursor::ByteCursor;
use crate::codec::primitive::FixedWidth;
use crate::error::{Result, StoreError};
use crate::kv::{check_key, KeyRange, KvRead, KvWrite, Table};
use crate::metrics::StoreMetrics;
use crate::schema::{UidTableSpec, META};

/// Compact identifier standing in for a longer byte sequence.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(u32);

impl Uid {
    pub const WIDTH: usize = 4;

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn put(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_bytes());
    }

    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        Ok(Self(cursor.read_u32()?))
    }

    /// Parse exactly four bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(bytes);
        let uid = Self::read(&mut cursor)?;
        cursor.expect_end("uid")?;
        Ok(uid)
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self.0)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct UidLookupTable {
    spec: UidTableSpec,
    max_key_length: usize,
    metrics: Arc<StoreMetrics>,
}

impl UidLookupTable {
    pub fn new(spec: UidTableSpec, max_key_length: usize, metrics: Arc<StoreMetrics>) -> Self {
        Self {
            spec,
            max_key_length,
            metrics,
        }
    }

    pub fn spec(&self) -> &UidTableSpec {
        &self.spec
    }

    /// UID of `value` if it has been interned.
    pub fn get<R: KvRead + ?Sized>(&self, txn: &R, value: &[u8]) -> Result<Option<Uid>> {
        // Could never have been interned; LMDB would reject the lookup itself.
        if value.is_empty() || value.len() > self.max_key_length {
            return Ok(None);
        }
        match txn.get(self.spec.forward, value)? {
            Some(bytes) => Ok(Some(Uid::from_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    /// UID of `value`, interning it with the next counter value if absent.
    pub fn get_or_create<W: KvWrite + ?Sized>(&self, txn: &mut W, value: &[u8]) -> Result<Uid> {
        if let Some(uid) = self.get(&*txn, value)? {
            return Ok(uid);
        }
        // Validate before touching the counter so a rejected value leaves no trace.
        check_key(value, self.max_key_length)?;

        let counter_key = self.spec.counter_key();
        let next = match txn.get(META, &counter_key)? {
            Some(bytes) => u32::read_at(bytes, 0)?,
            None => 0,
        };
        let following = next.checked_add(1).ok_or_else(|| {
            StoreError::corruption(format!("UID space exhausted in '{}'", self.spec.name))
        })?;

        let uid = Uid::new(next);
        txn.put(self.spec.forward, value, &uid.to_bytes())?;
        txn.put(self.spec.reverse, &uid.to_bytes(), value)?;
        txn.put(META, &counter_key, &following.to_be_bytes())?;

        self.metrics.record_uid_created();
        tracing::debug!("{}: created uid {} for {} bytes", self.spec.name, uid, value.len());
        Ok(uid)
    }

    /// Bytes behind a UID that is referenced from live data.
    ///
    /// A miss means a dangling reference and is reported as corruption.
    pub fn resolve<'t, R: KvRead + ?Sized>(&self, txn: &'t R, uid: Uid) -> Result<&'t [u8]> {
        self.try_resolve(txn, uid)?.ok_or_else(|| {
            StoreError::corruption(format!("uid {} missing from '{}'", uid, self.spec.name))
        })
    }

    pub fn try_resolve<'t, R: KvRead + ?Sized>(
        &self,
        txn: &'t R,
        uid: Uid,
    ) -> Result<Option<&'t [u8]>> {
        txn.get(self.spec.reverse, &uid.to_bytes())
    }

    /// Remove both directions of an entry. Returns false if the UID was unknown.
    pub fn delete<W: KvWrite + ?Sized>(&self, txn: &mut W, uid: Uid) -> Result<bool> {
        let value = match self.try_resolve(&*txn, uid)? {
            Some(value) => value.to_vec(),
            None => return Ok(false),
        };
        txn.delete(self.spec.forward, &value)?;
        txn.delete(self.spec.reverse, &uid.to_bytes())?;
        Ok(true)
    }

    /// Every (uid, value) whose value starts with `prefix`, in value order.
    pub fn scan_prefix<R: KvRead + ?Sized>(
        &self,
        txn: &R,
        prefix: &[u8],
    ) -> Result<Vec<(Uid, Vec<u8>)>> {
        let mut found = Vec::new();
        for item in txn.scan(self.spec.forward, KeyRange::Prefix(prefix))? {
            let (value, uid) = item?;
            found.push((Uid::from_bytes(uid)?, value.to_vec()));
        }
        Ok(found)
    }

    pub fn len<R: KvRead + ?Sized>(&self, txn: &R) -> Result<usize> {
        txn.count(self.spec.reverse)
    }

    pub(crate) fn reverse_table(&self) -> Table {
        self.spec.reverse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryKvStore};
    use crate::schema::KEYS_UID;

    fn table() -> UidLookupTable {
        UidLookupTable::new(KEYS_UID, 511, Arc::new(StoreMetrics::new()))
    }

    #[test]
    fn test_uids_are_sequential_and_stable() {
        let store = MemoryKvStore::default();
        let uids = table();
        let mut txn = store.write_txn().unwrap();
        let a = uids.get_or_create(&mut txn, b"alpha").unwrap();
        let b = uids.get_or_create(&mut txn, b"beta").unwrap();
        let a_again = uids.get_or_create(&mut txn, b"alpha").unwrap();
        assert_eq!(a, Uid::new(0));
        assert_eq!(b, Uid::new(1));
        assert_eq!(a_again, a, "same bytes must map to the same uid");
        txn.commit().unwrap();

        let read = store.read_txn().unwrap();
        assert_eq!(uids.resolve(&read, b).unwrap(), b"beta");
        assert_eq!(uids.get(&read, b"beta").unwrap(), Some(b));
        assert_eq!(uids.len(&read).unwrap(), 2);
    }

    #[test]
    fn test_counter_survives_delete() {
        let store = MemoryKvStore::default();
        let uids = table();
        let mut txn = store.write_txn().unwrap();
        let a = uids.get_or_create(&mut txn, b"a").unwrap();
        assert!(uids.delete(&mut txn, a).unwrap());
        assert!(!uids.delete(&mut txn, a).unwrap());
        let b = uids.get_or_create(&mut txn, b"a").unwrap();
        assert_ne!(a, b, "uids are not reused after delete");
        assert_eq!(uids.try_resolve(&txn, a).unwrap(), None);
    }

    #[test]
    fn test_resolve_missing_is_corruption() {
        let store = MemoryKvStore::default();
        let read = store.read_txn().unwrap();
        let err = table().resolve(&read, Uid::new(42)).unwrap_err();
        assert_eq!(err.code(), "CORRUPTION");
    }

    #[test]
    fn test_rejected_value_leaves_no_state() {
        let store = MemoryKvStore::default();
        let uids = UidLookupTable::new(KEYS_UID, 8, Arc::new(StoreMetrics::new()));
        let mut txn = store.write_txn().unwrap();
        let err = uids.get_or_create(&mut txn, b"123456789").unwrap_err();
        assert_eq!(err.code(), "KEY_TOO_LONG");
        assert!(txn.get(META, &KEYS_UID.counter_key()).unwrap().is_none());
        assert_eq!(uids.get_or_create(&mut txn, b"ok").unwrap(), Uid::new(0));
    }

    #[test]
    fn test_scan_prefix() {
        let store = MemoryKvStore::default();
        let uids = table();
        let mut txn = store.write_txn().unwrap();
        uids.get_or_create(&mut txn, b"s1/a").unwrap();
        uids.get_or_create(&mut txn, b"s2/a").unwrap();
        uids.get_or_create(&mut txn, b"s1/b").unwrap();
        let found = uids.scan_prefix(&txn, b"s1/").unwrap();
        let values: Vec<&[u8]> = found.iter().map(|(_, v)| v.as_slice()).collect();
        assert_eq!(values, vec![&b"s1/a"[..], &b"s1/b"[..]]);
    }
}
