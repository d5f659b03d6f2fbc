//! Used-lookups recorder for mark/sweep purge.
//!
//! Each lookup table has a companion `<name>-used` table. The mark phase puts
//! every id reachable from live data into it; the sweep phase deletes every
//! entry whose id was not marked. Both phases run in the same write
//! transaction, and the used table is cleared before marking, so marks left
//! by an interrupted run can never protect an entry.

use crate::error::Result;
use crate::kv::{KeyRange, KvRead, KvWrite, Table};
use crate::lookup::hash::{HashLookupKey, HashLookupTable};
use crate::lookup::uid::{Uid, UidLookupTable};

/// A lookup table that can take part in a purge.
pub trait LookupTable {
    fn name(&self) -> &'static str;

    fn used_table(&self) -> Table;

    /// Ids of every entry currently stored, in id order.
    fn entry_ids<R: KvRead + ?Sized>(&self, txn: &R) -> Result<Vec<Vec<u8>>>;

    fn delete_entry<W: KvWrite + ?Sized>(&self, txn: &mut W, id: &[u8]) -> Result<bool>;

    fn mark_used<W: KvWrite + ?Sized>(&self, txn: &mut W, id: &[u8]) -> Result<()> {
        txn.put(self.used_table(), id, &[])
    }

    fn is_marked<R: KvRead + ?Sized>(&self, txn: &R, id: &[u8]) -> Result<bool> {
        Ok(txn.get(self.used_table(), id)?.is_some())
    }

    /// Ids marked in the current pass.
    fn marked_ids<R: KvRead + ?Sized>(&self, txn: &R) -> Result<Vec<Vec<u8>>> {
        let mut ids = Vec::new();
        for item in txn.scan(self.used_table(), KeyRange::All)? {
            ids.push(item?.0.to_vec());
        }
        Ok(ids)
    }

    fn clear_marks<W: KvWrite + ?Sized>(&self, txn: &mut W) -> Result<()> {
        txn.clear(self.used_table())
    }

    /// Delete every unmarked entry. Returns the number deleted.
    fn sweep_unmarked<W: KvWrite + ?Sized>(&self, txn: &mut W) -> Result<u64> {
        let ids = self.entry_ids(&*txn)?;
        let mut deleted = 0u64;
        for id in ids {
            if !self.is_marked(&*txn, &id)? && self.delete_entry(txn, &id)? {
                deleted += 1;
            }
        }
        if deleted > 0 {
            tracing::debug!("{}: swept {} unused entries", self.name(), deleted);
        }
        Ok(deleted)
    }
}

impl LookupTable for UidLookupTable {
    fn name(&self) -> &'static str {
        self.spec().name
    }

    fn used_table(&self) -> Table {
        self.spec().used
    }

    fn entry_ids<R: KvRead + ?Sized>(&self, txn: &R) -> Result<Vec<Vec<u8>>> {
        let mut ids = Vec::new();
        for item in txn.scan(self.reverse_table(), KeyRange::All)? {
            ids.push(item?.0.to_vec());
        }
        Ok(ids)
    }

    fn delete_entry<W: KvWrite + ?Sized>(&self, txn: &mut W, id: &[u8]) -> Result<bool> {
        self.delete(txn, Uid::from_bytes(id)?)
    }
}

impl LookupTable for HashLookupTable {
    fn name(&self) -> &'static str {
        self.spec().name
    }

    fn used_table(&self) -> Table {
        self.spec().used
    }

    fn entry_ids<R: KvRead + ?Sized>(&self, txn: &R) -> Result<Vec<Vec<u8>>> {
        let mut ids = Vec::new();
        for item in txn.scan(self.spec().entries, KeyRange::All)? {
            ids.push(item?.0.to_vec());
        }
        Ok(ids)
    }

    fn delete_entry<W: KvWrite + ?Sized>(&self, txn: &mut W, id: &[u8]) -> Result<bool> {
        self.delete(txn, &HashLookupKey::from_bytes(id, self.hash_length())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::kv::{KvStore, MemoryKvStore};
    use crate::metrics::StoreMetrics;
    use crate::schema::{KEYS_HASH, TAG_VALUES_UID};
    use std::sync::Arc;

    #[test]
    fn test_sweep_keeps_only_marked_uids() {
        let store = MemoryKvStore::default();
        let uids = UidLookupTable::new(TAG_VALUES_UID, 511, Arc::new(StoreMetrics::new()));
        let mut txn = store.write_txn().unwrap();
        let keep = uids.get_or_create(&mut txn, b"keep").unwrap();
        let drop_me = uids.get_or_create(&mut txn, b"drop").unwrap();

        uids.mark_used(&mut txn, &keep.to_bytes()).unwrap();
        assert_eq!(uids.sweep_unmarked(&mut txn).unwrap(), 1);
        assert_eq!(uids.resolve(&txn, keep).unwrap(), b"keep");
        assert_eq!(uids.try_resolve(&txn, drop_me).unwrap(), None);
        assert_eq!(uids.get(&txn, b"drop").unwrap(), None);
    }

    #[test]
    fn test_cleared_marks_protect_nothing() {
        let store = MemoryKvStore::default();
        let hashes =
            HashLookupTable::new(KEYS_HASH, &StoreConfig::default(), Arc::new(StoreMetrics::new()));
        let mut txn = store.write_txn().unwrap();
        let id = hashes.get_or_create(&mut txn, &[5u8; 600]).unwrap();
        hashes.mark_used(&mut txn, id.as_bytes()).unwrap();
        assert_eq!(hashes.marked_ids(&txn).unwrap(), vec![id.as_bytes().to_vec()]);

        // Stale mark from an earlier pass.
        hashes.clear_marks(&mut txn).unwrap();
        assert!(!hashes.is_marked(&txn, id.as_bytes()).unwrap());
        assert_eq!(hashes.sweep_unmarked(&mut txn).unwrap(), 1);
        assert_eq!(hashes.len(&txn).unwrap(), 0);
    }
}
