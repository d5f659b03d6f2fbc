//! Adaptive keys: inline, UID lookup or hash lookup, chosen by size.
//!
//! ```text
//! size <= direct threshold        [0][value bytes]
//! size <= max key length          [1][uid u32]
//! larger                          [2][hash ‖ ordinal]
//! ```
//!
//! A variable key always runs to the end of the enclosing key, so the inline
//! form needs no length prefix.

use crate::codec::cursor::ByteCursor;
use crate::config::HashLength;
use crate::error::{Result, StoreError};
use crate::kv::{KvRead, KvWrite};
use crate::lookup::hash::{HashLookupKey, HashLookupTable};
use crate::lookup::uid::{Uid, UidLookupTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VariableKeyKind {
    Direct = 0,
    UidLookup = 1,
    HashLookup = 2,
}

impl VariableKeyKind {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Direct),
            1 => Ok(Self::UidLookup),
            2 => Ok(Self::HashLookup),
            other => Err(StoreError::corruption(format!(
                "unknown variable key marker {}",
                other
            ))),
        }
    }
}

/// A decoded but unresolved variable key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableKey<'a> {
    Direct(&'a [u8]),
    UidLookup(Uid),
    HashLookup(HashLookupKey),
}

impl<'a> VariableKey<'a> {
    pub fn kind(&self) -> VariableKeyKind {
        match self {
            VariableKey::Direct(_) => VariableKeyKind::Direct,
            VariableKey::UidLookup(_) => VariableKeyKind::UidLookup,
            VariableKey::HashLookup(_) => VariableKeyKind::HashLookup,
        }
    }

    /// Parse the marker and id, consuming the rest of the cursor.
    pub fn read(cursor: &mut ByteCursor<'a>, hash_length: HashLength) -> Result<Self> {
        let key = match VariableKeyKind::from_u8(cursor.read_u8()?)? {
            VariableKeyKind::Direct => VariableKey::Direct(cursor.read_rest()),
            VariableKeyKind::UidLookup => VariableKey::UidLookup(Uid::read(cursor)?),
            VariableKeyKind::HashLookup => VariableKey::HashLookup(HashLookupKey::from_bytes(
                cursor.read_rest(),
                hash_length,
            )?),
        };
        cursor.expect_end("variable key")?;
        Ok(key)
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.kind() as u8);
        match self {
            VariableKey::Direct(bytes) => out.extend_from_slice(bytes),
            VariableKey::UidLookup(uid) => uid.put(out),
            VariableKey::HashLookup(key) => out.extend_from_slice(key.as_bytes()),
        }
    }
}

/// Bytes an entry key spends ahead of an inline value: map uid, key prefix
/// kind and variable key marker. A direct key of `direct_key_threshold`
/// bytes needs this much room under the max key length.
pub const DIRECT_ENTRY_KEY_OVERHEAD: usize = Uid::WIDTH + 2;

pub struct VariableKeyCodec<'a> {
    uids: &'a UidLookupTable,
    hashes: &'a HashLookupTable,
    direct_threshold: usize,
    uid_threshold: usize,
}

impl<'a> VariableKeyCodec<'a> {
    pub fn new(
        uids: &'a UidLookupTable,
        hashes: &'a HashLookupTable,
        direct_threshold: usize,
        uid_threshold: usize,
    ) -> Self {
        Self {
            uids,
            hashes,
            direct_threshold,
            uid_threshold,
        }
    }

    pub fn kind_for(&self, len: usize) -> VariableKeyKind {
        if len <= self.direct_threshold {
            VariableKeyKind::Direct
        } else if len <= self.uid_threshold {
            VariableKeyKind::UidLookup
        } else {
            VariableKeyKind::HashLookup
        }
    }

    /// Append the key for `value`, interning it if needed.
    pub fn encode_for_put<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        value: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<VariableKeyKind> {
        let key = match self.kind_for(value.len()) {
            VariableKeyKind::Direct => VariableKey::Direct(value),
            VariableKeyKind::UidLookup => VariableKey::UidLookup(self.uids.get_or_create(txn, value)?),
            VariableKeyKind::HashLookup => {
                VariableKey::HashLookup(self.hashes.get_or_create(txn, value)?)
            }
        };
        key.write(out);
        tracing::trace!("variable key {:?} for {} bytes", key.kind(), value.len());
        Ok(key.kind())
    }

    /// Append the key for `value` without interning.
    ///
    /// Returns false if `value` was never interned, in which case no stored
    /// key can contain it and `out` is left unchanged.
    pub fn encode_for_get<R: KvRead + ?Sized>(
        &self,
        txn: &R,
        value: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<bool> {
        let key = match self.kind_for(value.len()) {
            VariableKeyKind::Direct => VariableKey::Direct(value),
            VariableKeyKind::UidLookup => match self.uids.get(txn, value)? {
                Some(uid) => VariableKey::UidLookup(uid),
                None => return Ok(false),
            },
            VariableKeyKind::HashLookup => match self.hashes.get(txn, value)? {
                Some(id) => VariableKey::HashLookup(id),
                None => return Ok(false),
            },
        };
        key.write(out);
        Ok(true)
    }

    /// Decode and resolve a key back to the original bytes.
    pub fn decode<R: KvRead + ?Sized>(&self, txn: &R, cursor: &mut ByteCursor<'_>) -> Result<Vec<u8>> {
        match VariableKey::read(cursor, self.hashes.hash_length())? {
            VariableKey::Direct(bytes) => Ok(bytes.to_vec()),
            VariableKey::UidLookup(uid) => Ok(self.uids.resolve(txn, uid)?.to_vec()),
            VariableKey::HashLookup(id) => Ok(self.hashes.resolve(txn, &id)?.to_vec()),
        }
    }
}
