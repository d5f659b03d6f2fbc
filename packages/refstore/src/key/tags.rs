//! Tag-set keys.
//!
//! A tag set is stored as two levels of UID lookup:
//!
//! ```text
//! names_uid ‖ value_uid[0] ‖ ... ‖ value_uid[n-1]
//!
//! names_uid  -> tag-names table:  u32 len ‖ utf8 name, repeated, sorted by name
//! value_uid  -> tag-values table: encoded typed value of the i-th sorted tag
//! ```
//!
//! Sorting by name makes the encoding independent of insertion order. The
//! empty tag set encodes to nothing.

use crate::codec::cursor::ByteCursor;
use crate::codec::primitive::{get_prefixed_str, put_prefixed_str};
use crate::codec::value::TypedValue;
use crate::error::{Result, StoreError};
use crate::kv::{KvRead, KvWrite};
use crate::lookup::uid::{Uid, UidLookupTable};

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub value: TypedValue,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<TypedValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Sort by name and reject duplicate names.
pub fn canonical_order(tags: &[Tag]) -> Result<Vec<&Tag>> {
    let mut sorted: Vec<&Tag> = tags.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    if let Some(pair) = sorted.windows(2).find(|w| w[0].name == w[1].name) {
        return Err(StoreError::InvalidKey(format!(
            "duplicate tag name '{}'",
            pair[0].name
        )));
    }
    Ok(sorted)
}

fn encode_names(sorted: &[&Tag]) -> Vec<u8> {
    let mut out = Vec::new();
    for tag in sorted {
        put_prefixed_str(&mut out, &tag.name);
    }
    out
}

fn decode_names(bytes: &[u8]) -> Result<Vec<String>> {
    let mut cursor = ByteCursor::new(bytes);
    let mut names = Vec::new();
    while !cursor.is_empty() {
        names.push(get_prefixed_str(&mut cursor)?.to_string());
    }
    Ok(names)
}

/// Unresolved UIDs of an encoded tag set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagUids {
    pub names: Option<Uid>,
    pub values: Vec<Uid>,
}

impl TagUids {
    /// Consumes the rest of the cursor.
    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        if cursor.is_empty() {
            return Ok(Self::default());
        }
        let names = Uid::read(cursor)?;
        let mut values = Vec::new();
        while !cursor.is_empty() {
            values.push(Uid::read(cursor)?);
        }
        Ok(Self {
            names: Some(names),
            values,
        })
    }
}

pub struct TagsCodec<'a> {
    names: &'a UidLookupTable,
    values: &'a UidLookupTable,
}

impl<'a> TagsCodec<'a> {
    pub fn new(names: &'a UidLookupTable, values: &'a UidLookupTable) -> Self {
        Self { names, values }
    }

    pub fn encode_for_put<W: KvWrite + ?Sized>(
        &self,
        txn: &mut W,
        tags: &[Tag],
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let sorted = canonical_order(tags)?;
        if sorted.is_empty() {
            return Ok(());
        }
        let names_uid = self.names.get_or_create(txn, &encode_names(&sorted))?;
        names_uid.put(out);
        for tag in sorted {
            self.values.get_or_create(txn, &tag.value.encode())?.put(out);
        }
        Ok(())
    }

    /// Returns false if any part of the set was never interned.
    pub fn encode_for_get<R: KvRead + ?Sized>(
        &self,
        txn: &R,
        tags: &[Tag],
        out: &mut Vec<u8>,
    ) -> Result<bool> {
        let sorted = canonical_order(tags)?;
        if sorted.is_empty() {
            return Ok(true);
        }
        let mut encoded = Vec::with_capacity(Uid::WIDTH * (sorted.len() + 1));
        match self.names.get(txn, &encode_names(&sorted))? {
            Some(uid) => uid.put(&mut encoded),
            None => return Ok(false),
        }
        for tag in sorted {
            match self.values.get(txn, &tag.value.encode())? {
                Some(uid) => uid.put(&mut encoded),
                None => return Ok(false),
            }
        }
        out.extend_from_slice(&encoded);
        Ok(true)
    }

    /// Resolve an encoded tag set, in canonical (name) order.
    pub fn decode<R: KvRead + ?Sized>(&self, txn: &R, cursor: &mut ByteCursor<'_>) -> Result<Vec<Tag>> {
        let uids = TagUids::read(cursor)?;
        let Some(names_uid) = uids.names else {
            return Ok(Vec::new());
        };
        let names = decode_names(self.names.resolve(txn, names_uid)?)?;
        if names.len() != uids.values.len() {
            return Err(StoreError::corruption(format!(
                "tag set has {} names but {} values",
                names.len(),
                uids.values.len()
            )));
        }
        names
            .into_iter()
            .zip(uids.values)
            .map(|(name, value_uid)| {
                let value = TypedValue::decode(self.values.resolve(txn, value_uid)?)?;
                Ok::<Tag, StoreError>(Tag { name, value })
            })
            .collect()
    }
}
