//! LMDB backend via `heed`.
//!
//! One named database per [`Table`], all created when the environment is
//! opened. LMDB itself provides the transaction model: one writer at a time,
//! readers on MVCC snapshots that never block.

use std::collections::HashMap;
use std::ops::Bound;
use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};

use crate::config::{StoreConfig, DEFAULT_MAX_KEY_LENGTH};
use crate::error::{Result, StoreError};
use crate::kv::{check_key, KeyRange, KvIter, KvRead, KvStore, KvWrite, Table};
use crate::schema;

type BytesDb = Database<Bytes, Bytes>;

pub struct LmdbKvStore {
    env: Env,
    tables: HashMap<&'static str, BytesDb>,
    max_key_length: usize,
}

impl LmdbKvStore {
    /// Open (or create) an environment in `dir` with every schema table.
    pub fn open(dir: &Path, config: &StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let tables_to_create = schema::all_tables();

        // SAFETY: the directory is dedicated to this store and is not opened
        // twice in the same process with different options.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.map_size_bytes)
                .max_dbs(tables_to_create.len() as u32)
                .open(dir)?
        };

        let mut wtxn = env.write_txn()?;
        let mut tables = HashMap::with_capacity(tables_to_create.len());
        for table in tables_to_create {
            let db: BytesDb = env.create_database(&mut wtxn, Some(table.name()))?;
            tables.insert(table.name(), db);
        }
        wtxn.commit()?;

        tracing::info!("Opened LMDB store at {} ({} tables)", dir.display(), tables.len());
        Ok(Self {
            env,
            tables,
            // LMDB's compiled-in limit caps whatever the config asks for.
            max_key_length: config.max_key_length.min(DEFAULT_MAX_KEY_LENGTH),
        })
    }

    fn db(&self, table: Table) -> Result<BytesDb> {
        lookup_db(&self.tables, table)
    }
}

fn lookup_db(tables: &HashMap<&'static str, BytesDb>, table: Table) -> Result<BytesDb> {
    tables
        .get(table.name())
        .copied()
        .ok_or_else(|| StoreError::InvalidKey(format!("unknown table '{}'", table.name())))
}

fn scan_db<'t>(db: BytesDb, txn: &'t RoTxn<'_>, range: KeyRange<'_>) -> Result<KvIter<'t>> {
    match range {
        KeyRange::All => {
            let iter = db.iter(txn)?;
            Ok(Box::new(iter.map(|item| item.map_err(StoreError::from))))
        }
        KeyRange::Prefix(prefix) => {
            let iter = db.prefix_iter(txn, prefix)?;
            Ok(Box::new(iter.map(|item| item.map_err(StoreError::from))))
        }
    }
}

fn scan_rev_db<'t>(
    db: BytesDb,
    txn: &'t RoTxn<'_>,
    prefix: &[u8],
    last: &[u8],
) -> Result<KvIter<'t>> {
    if last < prefix {
        return Ok(Box::new(std::iter::empty()));
    }
    let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Included(prefix), Bound::Included(last));
    let iter = db.rev_range(txn, &bounds)?;
    let prefix = prefix.to_vec();
    Ok(Box::new(
        iter.take_while(move |item| item.as_ref().map_or(true, |(k, _)| k.starts_with(&prefix)))
            .map(|item| item.map_err(StoreError::from)),
    ))
}

impl KvStore for LmdbKvStore {
    type ReadTxn<'a> = LmdbReadTxn<'a> where Self: 'a;
    type WriteTxn<'a> = LmdbWriteTxn<'a> where Self: 'a;

    fn read_txn(&self) -> Result<Self::ReadTxn<'_>> {
        Ok(LmdbReadTxn {
            txn: self.env.read_txn()?,
            tables: &self.tables,
        })
    }

    fn write_txn(&self) -> Result<Self::WriteTxn<'_>> {
        Ok(LmdbWriteTxn {
            txn: self.env.write_txn()?,
            tables: &self.tables,
            max_key_length: self.max_key_length,
        })
    }

    fn max_key_length(&self) -> usize {
        self.max_key_length
    }
}

pub struct LmdbReadTxn<'e> {
    txn: RoTxn<'e>,
    tables: &'e HashMap<&'static str, BytesDb>,
}

impl KvRead for LmdbReadTxn<'_> {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<&[u8]>> {
        Ok(lookup_db(self.tables, table)?.get(&self.txn, key)?)
    }

    fn scan(&self, table: Table, range: KeyRange<'_>) -> Result<KvIter<'_>> {
        scan_db(lookup_db(self.tables, table)?, &self.txn, range)
    }

    fn scan_rev(&self, table: Table, prefix: &[u8], last: &[u8]) -> Result<KvIter<'_>> {
        scan_rev_db(lookup_db(self.tables, table)?, &self.txn, prefix, last)
    }
}

pub struct LmdbWriteTxn<'e> {
    txn: RwTxn<'e>,
    tables: &'e HashMap<&'static str, BytesDb>,
    max_key_length: usize,
}

impl KvRead for LmdbWriteTxn<'_> {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<&[u8]>> {
        Ok(lookup_db(self.tables, table)?.get(&self.txn, key)?)
    }

    fn scan(&self, table: Table, range: KeyRange<'_>) -> Result<KvIter<'_>> {
        scan_db(lookup_db(self.tables, table)?, &self.txn, range)
    }

    fn scan_rev(&self, table: Table, prefix: &[u8], last: &[u8]) -> Result<KvIter<'_>> {
        scan_rev_db(lookup_db(self.tables, table)?, &self.txn, prefix, last)
    }
}

impl KvWrite for LmdbWriteTxn<'_> {
    fn put(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key, self.max_key_length)?;
        lookup_db(self.tables, table)?.put(&mut self.txn, key, value)?;
        Ok(())
    }

    fn delete(&mut self, table: Table, key: &[u8]) -> Result<bool> {
        Ok(lookup_db(self.tables, table)?.delete(&mut self.txn, key)?)
    }

    fn clear(&mut self, table: Table) -> Result<()> {
        lookup_db(self.tables, table)?.clear(&mut self.txn)?;
        Ok(())
    }

    fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }

    fn abort(self) {
        drop(self.txn);
    }
}

impl LmdbKvStore {
    /// Number of entries in a table, straight from LMDB's stats.
    pub fn table_len(&self, table: Table) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db(table)?.len(&rtxn)?)
    }
}
