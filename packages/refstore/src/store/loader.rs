//! Bulk loading of one reference stream inside a single write transaction.
//!
//! The stream is marked LOAD_IN_PROGRESS when the loader is created. Readers
//! never see that state: they keep reading the last committed snapshot until
//! [`RefDataLoader::complete`] commits the entries together with the
//! COMPLETE state. Dropping the loader (or calling `abort`) discards the
//! whole load.

use std::collections::HashMap;

use crate::codec::value::TypedValue;
use crate::error::Result;
use crate::key::{FixedWidthKey, KeyPrefix, RefStreamDefinition, RefStreamKey, ValueRange};
use crate::kv::{KvRead, KvStore, KvWrite};
use crate::lookup::uid::Uid;
use crate::record::processing_info::{self, now_ms, ProcessingInfo, ProcessingState};
use crate::schema::PROCESSING_INFO;

use super::{PutOutcome, RefDataStore};

/// Counts reported by a completed load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub maps: usize,
    pub entries: u64,
    pub range_entries: u64,
    pub ignored: u64,
}

pub struct RefDataLoader<'s, S: KvStore + 's> {
    store: &'s RefDataStore<S>,
    txn: S::WriteTxn<'s>,
    stream: RefStreamDefinition,
    stream_key: RefStreamKey,
    map_uids: HashMap<String, Uid>,
    summary: LoadSummary,
}

impl<S: KvStore> RefDataStore<S> {
    /// Start loading `def`. Holds the write transaction until the loader is
    /// completed or dropped.
    pub fn begin_load(
        &self,
        def: &RefStreamDefinition,
        effective_time_ms: i64,
    ) -> Result<RefDataLoader<'_, S>> {
        let mut txn = self.kv.write_txn()?;
        let stream_key = self.definitions().stream_key_for_put(&mut txn, def)?;
        let key_bytes = stream_key.to_key_bytes();
        let now = now_ms();
        let create_time_ms = match txn.get(PROCESSING_INFO, &key_bytes)? {
            Some(stored) => ProcessingInfo::decode(stored)?.create_time_ms,
            None => now,
        };
        let info = ProcessingInfo {
            create_time_ms,
            last_accessed_time_ms: now,
            effective_time_ms,
            state: ProcessingState::LoadInProgress,
        };
        txn.put(PROCESSING_INFO, &key_bytes, &info.encode())?;
        tracing::debug!(
            "Loading stream {}:{} part {}",
            def.pipeline_doc_uuid,
            def.stream_id,
            def.part_index
        );

        Ok(RefDataLoader {
            store: self,
            txn,
            stream: def.clone(),
            stream_key,
            map_uids: HashMap::new(),
            summary: LoadSummary::default(),
        })
    }
}

impl<'s, S: KvStore + 's> RefDataLoader<'s, S> {
    pub fn stream(&self) -> &RefStreamDefinition {
        &self.stream
    }

    fn map_uid(&mut self, map_name: &str) -> Result<Uid> {
        if let Some(uid) = self.map_uids.get(map_name) {
            return Ok(*uid);
        }
        let uid = self
            .store
            .definitions()
            .map_uid_for_put(&mut self.txn, &self.stream_key, map_name)?;
        self.map_uids.insert(map_name.to_string(), uid);
        Ok(uid)
    }

    pub fn put(&mut self, map_name: &str, prefix: &KeyPrefix, value: &TypedValue) -> Result<PutOutcome> {
        let map_uid = self.map_uid(map_name)?;
        let outcome = self.store.put_entry(&mut self.txn, map_uid, prefix, value)?;
        self.record(outcome, false);
        Ok(outcome)
    }

    pub fn put_range(&mut self, map_name: &str, range: ValueRange, value: &TypedValue) -> Result<PutOutcome> {
        let map_uid = self.map_uid(map_name)?;
        let outcome = self
            .store
            .put_range_entry(&mut self.txn, map_uid, range, value)?;
        self.record(outcome, true);
        Ok(outcome)
    }

    fn record(&mut self, outcome: PutOutcome, range: bool) {
        match outcome {
            PutOutcome::Ignored => self.summary.ignored += 1,
            _ if range => self.summary.range_entries += 1,
            _ => self.summary.entries += 1,
        }
    }

    /// Mark the stream COMPLETE and commit everything loaded.
    pub fn complete(mut self) -> Result<LoadSummary> {
        self.set_state(ProcessingState::Complete)?;
        self.txn.commit()?;
        self.summary.maps = self.map_uids.len();
        tracing::info!(
            "Loaded stream {}:{}: {} maps, {} entries, {} ranges",
            self.stream.pipeline_doc_uuid,
            self.stream.stream_id,
            self.summary.maps,
            self.summary.entries,
            self.summary.range_entries
        );
        Ok(self.summary)
    }

    /// Discard everything written by this loader.
    pub fn abort(self) {
        tracing::debug!(
            "Aborted load of stream {}:{}",
            self.stream.pipeline_doc_uuid,
            self.stream.stream_id
        );
        self.txn.abort();
    }

    fn set_state(&mut self, state: ProcessingState) -> Result<()> {
        let key_bytes = self.stream_key.to_key_bytes();
        let mut info = self.store.pool.checkout();
        if let Some(stored) = self.txn.get(PROCESSING_INFO, &key_bytes)? {
            info.extend_from_slice(stored);
        }
        processing_info::write_state(&mut info, state)?;
        self.txn.put(PROCESSING_INFO, &key_bytes, &info)
    }
}
