//! Reference-counted value record.
//!
//! ```text
//! Offset  Size  Field
//! 0       1     type tag
//! 1       4     reference count (i32 BE)
//! 5       n     payload
//! ```
//!
//! The count is rewritten in place with an absolute write; the tag and payload
//! are never touched by a count update.

use crate::codec::primitive::FixedWidth;
use crate::codec::value::{RawValue, TypeTag, TypedValue};
use crate::error::{Result, StoreError};

pub const TYPE_TAG_OFFSET: usize = 0;
pub const REF_COUNT_OFFSET: usize = 1;
pub const PAYLOAD_OFFSET: usize = 5;

/// Append a complete record.
pub fn encode(value: &TypedValue, ref_count: i32, out: &mut Vec<u8>) {
    out.push(value.type_tag() as u8);
    ref_count.put(out);
    value.encode_payload(out);
}

/// Add `delta` to the count in place and return the new count.
///
/// Negative results are written as-is; callers decide what a count of zero
/// or less means.
pub fn update_reference_count(record: &mut [u8], delta: i32) -> Result<i32> {
    let current = i32::read_at(record, REF_COUNT_OFFSET)?;
    let updated = current.checked_add(delta).ok_or_else(|| {
        StoreError::corruption(format!("reference count overflow: {} + {}", current, delta))
    })?;
    updated.write_at(record, REF_COUNT_OFFSET)?;
    Ok(updated)
}

/// Borrowed view of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRecordRef<'a> {
    pub type_tag: TypeTag,
    pub ref_count: i32,
    pub payload: &'a [u8],
}

impl<'a> ValueRecordRef<'a> {
    pub fn parse(record: &'a [u8]) -> Result<Self> {
        if record.len() < PAYLOAD_OFFSET {
            return Err(StoreError::corruption(format!(
                "value record of {} bytes, header needs {}",
                record.len(),
                PAYLOAD_OFFSET
            )));
        }
        Ok(Self {
            type_tag: TypeTag::parse(record[TYPE_TAG_OFFSET])?,
            ref_count: i32::read_at(record, REF_COUNT_OFFSET)?,
            payload: &record[PAYLOAD_OFFSET..],
        })
    }

    /// Same type and payload; the count is ignored.
    pub fn holds(&self, type_tag: TypeTag, payload: &[u8]) -> bool {
        self.type_tag == type_tag && self.payload == payload
    }

    pub fn value(&self) -> Result<TypedValue> {
        TypedValue::decode_payload(self.type_tag, self.payload)
    }

    pub fn to_raw(&self) -> RawValue {
        RawValue {
            type_tag: self.type_tag,
            payload: self.payload.to_vec(),
        }
    }
}
