//! In-memory transactional store with snapshot isolation.
//!
//! Each table is an `Arc<BTreeMap>`. A read transaction clones the current
//! table map (cheap `Arc` clones) and never blocks. The write transaction
//! holds the writer mutex for its whole life and copies a table only on its
//! first mutation (`Arc::make_mut`). Commit swaps the new snapshot in; an
//! abort just drops it.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::error::{Result, StoreError};
use crate::kv::{check_key, KeyRange, KvIter, KvRead, KvStore, KvWrite, Table};

type TableMap = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Clone, Default)]
struct Snapshot {
    tables: HashMap<&'static str, Arc<TableMap>>,
}

impl Snapshot {
    fn table(&self, table: Table) -> Option<&TableMap> {
        self.tables.get(table.name()).map(|t| t.as_ref())
    }

    fn table_mut(&mut self, table: Table) -> &mut TableMap {
        Arc::make_mut(self.tables.entry(table.name()).or_default())
    }

    fn get(&self, table: Table, key: &[u8]) -> Option<&[u8]> {
        self.table(table)
            .and_then(|t| t.get(key))
            .map(Vec::as_slice)
    }

    fn scan(&self, table: Table, range: KeyRange<'_>) -> KvIter<'_> {
        let Some(map) = self.table(table) else {
            return Box::new(std::iter::empty());
        };
        match range {
            KeyRange::All => Box::new(
                map.iter()
                    .map(|(k, v)| Ok::<_, StoreError>((k.as_slice(), v.as_slice()))),
            ),
            KeyRange::Prefix(prefix) => {
                let prefix = prefix.to_vec();
                let bounds: (Bound<Vec<u8>>, Bound<Vec<u8>>) =
                    (Bound::Included(prefix.clone()), Bound::Unbounded);
                Box::new(
                    map.range(bounds)
                        .take_while(move |(k, _)| k.starts_with(&prefix))
                        .map(|(k, v)| Ok::<_, StoreError>((k.as_slice(), v.as_slice()))),
                )
            }
        }
    }

    fn scan_rev(&self, table: Table, prefix: &[u8], last: &[u8]) -> KvIter<'_> {
        let Some(map) = self.table(table) else {
            return Box::new(std::iter::empty());
        };
        // BTreeMap::range panics on inverted bounds.
        if last < prefix {
            return Box::new(std::iter::empty());
        }
        let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Included(prefix), Bound::Included(last));
        let prefix = prefix.to_vec();
        Box::new(
            map.range::<[u8], _>(bounds)
                .rev()
                .take_while(move |(k, _)| k.starts_with(&prefix))
                .map(|(k, v)| Ok::<_, StoreError>((k.as_slice(), v.as_slice()))),
        )
    }
}

/// Heap-backed [`KvStore`] with the same transaction semantics as LMDB.
#[derive(Debug)]
pub struct MemoryKvStore {
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    max_key_length: usize,
}

impl MemoryKvStore {
    pub fn new(max_key_length: usize) -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::default())),
            writer: Mutex::new(()),
            max_key_length,
        }
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_KEY_LENGTH)
    }
}

impl KvStore for MemoryKvStore {
    type ReadTxn<'a> = MemoryReadTxn where Self: 'a;
    type WriteTxn<'a> = MemoryWriteTxn<'a> where Self: 'a;

    fn read_txn(&self) -> Result<Self::ReadTxn<'_>> {
        Ok(MemoryReadTxn {
            snapshot: self.snapshot(),
        })
    }

    fn write_txn(&self) -> Result<Self::WriteTxn<'_>> {
        let guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let working = Snapshot::clone(&self.snapshot());
        Ok(MemoryWriteTxn {
            store: self,
            working,
            _guard: guard,
        })
    }

    fn max_key_length(&self) -> usize {
        self.max_key_length
    }
}

/// Read-only view of one committed snapshot.
pub struct MemoryReadTxn {
    snapshot: Arc<Snapshot>,
}

impl KvRead for MemoryReadTxn {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<&[u8]>> {
        Ok(self.snapshot.get(table, key))
    }

    fn scan(&self, table: Table, range: KeyRange<'_>) -> Result<KvIter<'_>> {
        Ok(self.snapshot.scan(table, range))
    }

    fn scan_rev(&self, table: Table, prefix: &[u8], last: &[u8]) -> Result<KvIter<'_>> {
        Ok(self.snapshot.scan_rev(table, prefix, last))
    }
}

/// The single active writer. Sees its own uncommitted changes.
pub struct MemoryWriteTxn<'a> {
    store: &'a MemoryKvStore,
    working: Snapshot,
    _guard: MutexGuard<'a, ()>,
}

impl KvRead for MemoryWriteTxn<'_> {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<&[u8]>> {
        Ok(self.working.get(table, key))
    }

    fn scan(&self, table: Table, range: KeyRange<'_>) -> Result<KvIter<'_>> {
        Ok(self.working.scan(table, range))
    }

    fn scan_rev(&self, table: Table, prefix: &[u8], last: &[u8]) -> Result<KvIter<'_>> {
        Ok(self.working.scan_rev(table, prefix, last))
    }
}

impl KvWrite for MemoryWriteTxn<'_> {
    fn put(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key, self.store.max_key_length)?;
        self.working
            .table_mut(table)
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, table: Table, key: &[u8]) -> Result<bool> {
        if self.working.get(table, key).is_none() {
            return Ok(false);
        }
        Ok(self.working.table_mut(table).remove(key).is_some())
    }

    fn clear(&mut self, table: Table) -> Result<()> {
        self.working.tables.remove(table.name());
        Ok(())
    }

    fn commit(self) -> Result<()> {
        let MemoryWriteTxn {
            store,
            working,
            _guard,
        } = self;
        *store
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(working);
        Ok(())
    }

    fn abort(self) {}
}
