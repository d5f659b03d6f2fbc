//! Primitive codecs: fixed-width big-endian scalars and strings.
//!
//! Fixed-width values support two access styles:
//! - sequential: `put` appends to a `Vec<u8>`, `get` reads from a [`ByteCursor`]
//! - absolute: `read_at` / `write_at` touch exactly `WIDTH` bytes at an offset
//!   and nothing else, which is what in-place record updates rely on.

use crate::codec::cursor::ByteCursor;
use crate::error::{Result, StoreError};

/// A scalar with a fixed encoded width.
pub trait FixedWidth: Sized + Copy {
    const WIDTH: usize;

    fn put(self, out: &mut Vec<u8>);

    fn get(cursor: &mut ByteCursor<'_>) -> Result<Self>;

    /// Read at an absolute offset without any cursor state.
    fn read_at(buf: &[u8], offset: usize) -> Result<Self> {
        let end = offset.checked_add(Self::WIDTH).filter(|&end| end <= buf.len());
        match end {
            Some(end) => Self::get(&mut ByteCursor::new(&buf[offset..end])),
            None => Err(out_of_bounds(offset, Self::WIDTH, buf.len())),
        }
    }

    /// Overwrite `WIDTH` bytes at an absolute offset; other bytes are untouched.
    fn write_at(self, buf: &mut [u8], offset: usize) -> Result<()> {
        let end = offset
            .checked_add(Self::WIDTH)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| out_of_bounds(offset, Self::WIDTH, buf.len()))?;
        let mut scratch = Vec::with_capacity(Self::WIDTH);
        self.put(&mut scratch);
        buf[offset..end].copy_from_slice(&scratch);
        Ok(())
    }
}

fn out_of_bounds(offset: usize, width: usize, len: usize) -> StoreError {
    StoreError::corruption(format!(
        "field at offset {} (width {}) outside buffer of {} bytes",
        offset, width, len
    ))
}

macro_rules! fixed_width_scalar {
    ($ty:ty, $read:ident) => {
        impl FixedWidth for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn put(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_be_bytes());
            }

            fn get(cursor: &mut ByteCursor<'_>) -> Result<Self> {
                cursor.$read()
            }
        }
    };
}

fixed_width_scalar!(u8, read_u8);
fixed_width_scalar!(i8, read_i8);
fixed_width_scalar!(i16, read_i16);
fixed_width_scalar!(u16, read_u16);
fixed_width_scalar!(i32, read_i32);
fixed_width_scalar!(u32, read_u32);
fixed_width_scalar!(i64, read_i64);
fixed_width_scalar!(f32, read_f32);
fixed_width_scalar!(f64, read_f64);

impl FixedWidth for bool {
    const WIDTH: usize = 1;

    fn put(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn get(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        match cursor.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(StoreError::corruption(format!("invalid boolean byte {}", other))),
        }
    }
}

/// Decode a whole buffer as UTF-8.
pub fn decode_str(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map_err(|e| StoreError::corruption(format!("invalid UTF-8 string: {}", e)))
}

/// Append `u32 len ‖ utf8`.
pub fn put_prefixed_str(out: &mut Vec<u8>, s: &str) {
    (s.len() as u32).put(out);
    out.extend_from_slice(s.as_bytes());
}

pub fn get_prefixed_str<'a>(cursor: &mut ByteCursor<'a>) -> Result<&'a str> {
    let len = cursor.read_u32()? as usize;
    decode_str(cursor.read_bytes(len)?)
}
