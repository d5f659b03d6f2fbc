//! Transactional ordered key-value store seam.
//!
//! Everything above this module talks to the engine through three traits:
//! [`KvStore`] hands out transactions, [`KvRead`] reads within a snapshot and
//! [`KvWrite`] mutates within the single active write transaction.
//!
//! Byte slices returned by `get`/`scan` borrow from the transaction, so the
//! compiler rejects any attempt to keep them after the transaction ends.
//!
//! Backends:
//! - [`MemoryKvStore`]: copy-on-write snapshots, used by tests and tools
//! - `LmdbKvStore`: memory-mapped LMDB environment (feature `lmdb`)

pub mod memory;
#[cfg(feature = "lmdb")]
pub mod lmdb;

pub use memory::MemoryKvStore;
#[cfg(feature = "lmdb")]
pub use lmdb::LmdbKvStore;

use crate::error::{Result, StoreError};

/// A named table (LMDB sub-database) inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Table(&'static str);

impl Table {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(self) -> &'static str {
        self.0
    }
}

/// Key selection for ordered scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRange<'k> {
    All,
    /// Every key starting with these bytes.
    Prefix(&'k [u8]),
}

impl KeyRange<'_> {
    pub fn contains(&self, key: &[u8]) -> bool {
        match self {
            KeyRange::All => true,
            KeyRange::Prefix(prefix) => key.starts_with(prefix),
        }
    }
}

/// Ascending (key, value) iterator borrowing from a transaction.
pub type KvIter<'t> = Box<dyn Iterator<Item = Result<(&'t [u8], &'t [u8])>> + 't>;

/// Read access within one transaction snapshot.
pub trait KvRead {
    /// Point lookup. The returned slice is valid for the life of the borrow.
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<&[u8]>>;

    /// Ordered scan over a key range.
    fn scan(&self, table: Table, range: KeyRange<'_>) -> Result<KvIter<'_>>;

    /// Descending scan over keys that start with `prefix` and sort at or
    /// before `last`, starting from the greatest such key.
    fn scan_rev(&self, table: Table, prefix: &[u8], last: &[u8]) -> Result<KvIter<'_>>;

    /// Number of entries in a table. O(n).
    fn count(&self, table: Table) -> Result<usize> {
        let mut count = 0;
        for item in self.scan(table, KeyRange::All)? {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

/// Mutations within the single active write transaction.
///
/// Dropping a write transaction without calling `commit` aborts it.
pub trait KvWrite: KvRead {
    fn put(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<()>;

    /// Returns true if the key existed.
    fn delete(&mut self, table: Table, key: &[u8]) -> Result<bool>;

    /// Remove every entry of a table.
    fn clear(&mut self, table: Table) -> Result<()>;

    fn commit(self) -> Result<()>;

    fn abort(self);
}

/// Handle to a transactional store: single writer, many concurrent readers.
pub trait KvStore: Send + Sync {
    type ReadTxn<'a>: KvRead
    where
        Self: 'a;
    type WriteTxn<'a>: KvWrite
    where
        Self: 'a;

    /// Begin a read transaction over a consistent point-in-time snapshot.
    fn read_txn(&self) -> Result<Self::ReadTxn<'_>>;

    /// Begin the write transaction. Blocks while another writer is active,
    /// so never open two write transactions on the same thread.
    fn write_txn(&self) -> Result<Self::WriteTxn<'_>>;

    /// Longest key the engine accepts.
    fn max_key_length(&self) -> usize;
}

/// Reject keys the engine cannot store, before any write happens.
pub fn check_key(key: &[u8], max_key_length: usize) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("empty key".into()));
    }
    if key.len() > max_key_length {
        return Err(StoreError::KeyTooLong {
            len: key.len(),
            max: max_key_length,
        });
    }
    Ok(())
}
