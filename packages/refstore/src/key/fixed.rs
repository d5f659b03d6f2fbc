//! Keys with a fixed encoded width.
//!
//! Fixed-width keys can be concatenated and still split unambiguously, and a
//! fixed-width head makes every key sharing it a prefix-scan range.

use crate::codec::cursor::ByteCursor;
use crate::error::Result;
use crate::lookup::uid::Uid;

pub trait FixedWidthKey: Sized {
    const WIDTH: usize;

    fn write_key(&self, out: &mut Vec<u8>);

    fn read_key(cursor: &mut ByteCursor<'_>) -> Result<Self>;

    fn to_key_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIDTH);
        self.write_key(&mut out);
        out
    }

    /// Parse a buffer holding exactly one key.
    fn from_key_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(bytes);
        let key = Self::read_key(&mut cursor)?;
        cursor.expect_end("fixed width key")?;
        Ok(key)
    }
}

impl FixedWidthKey for Uid {
    const WIDTH: usize = Uid::WIDTH;

    fn write_key(&self, out: &mut Vec<u8>) {
        self.put(out);
    }

    fn read_key(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        Uid::read(cursor)
    }
}

/// A signed long in sign-flipped big-endian form, so that byte order equals
/// numeric order for negative values too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderedI64(pub i64);

impl FixedWidthKey for OrderedI64 {
    const WIDTH: usize = 8;

    fn write_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&((self.0 as u64) ^ (1 << 63)).to_be_bytes());
    }

    fn read_key(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let raw = cursor.read_i64()? as u64;
        Ok(Self((raw ^ (1 << 63)) as i64))
    }
}
