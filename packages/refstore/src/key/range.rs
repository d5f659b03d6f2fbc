//! Range keys: a map UID plus a half-open `[from, to)` interval.
//!
//! ```text
//! map_uid (4) ‖ from (8, sign-flipped BE) ‖ to (8, sign-flipped BE)
//! ```
//!
//! Sign-flipped longs sort numerically, so a prefix scan over one map visits
//! its ranges in ascending `from` order.

use crate::codec::cursor::ByteCursor;
use crate::error::{Result, StoreError};
use crate::key::fixed::{FixedWidthKey, OrderedI64};
use crate::lookup::uid::Uid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRange {
    from: i64,
    to: i64,
}

impl ValueRange {
    /// `from` inclusive, `to` exclusive. Empty ranges are rejected.
    pub fn new(from: i64, to: i64) -> Result<Self> {
        if from >= to {
            return Err(StoreError::InvalidKey(format!(
                "range [{}, {}) is empty",
                from, to
            )));
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> i64 {
        self.from
    }

    pub fn to(&self) -> i64 {
        self.to
    }

    pub fn contains(&self, point: i64) -> bool {
        self.from <= point && point < self.to
    }
}

/// Key of a range entry within one map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeKey {
    pub map_uid: Uid,
    pub range: ValueRange,
}

impl FixedWidthKey for RangeKey {
    const WIDTH: usize = Uid::WIDTH + 2 * OrderedI64::WIDTH;

    fn write_key(&self, out: &mut Vec<u8>) {
        self.map_uid.write_key(out);
        OrderedI64(self.range.from).write_key(out);
        OrderedI64(self.range.to).write_key(out);
    }

    fn read_key(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let map_uid = Uid::read_key(cursor)?;
        let from = OrderedI64::read_key(cursor)?.0;
        let to = OrderedI64::read_key(cursor)?.0;
        let range = ValueRange::new(from, to)
            .map_err(|_| StoreError::corruption(format!("stored range [{}, {}) is empty", from, to)))?;
        Ok(Self { map_uid, range })
    }
}
