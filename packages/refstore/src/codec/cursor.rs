//! Read cursor over a borrowed byte slice.
//!
//! Every read advances the cursor and fails with `Corruption` if the slice is
//! too short. Nothing is shared between cursors: each decode call creates its
//! own, starting at offset 0 of the slice it was given.

use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! read_be {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Result<$ty> {
            const N: usize = std::mem::size_of::<$ty>();
            let bytes = self.read_bytes(N)?;
            let mut arr = [0u8; N];
            arr.copy_from_slice(bytes);
            Ok(<$ty>::from_be_bytes(arr))
        }
    };
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Next `len` bytes as a sub-slice of the original buffer.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(StoreError::corruption(format!(
                "truncated buffer: need {} bytes at offset {}, {} remaining",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// All remaining bytes; leaves the cursor fully consumed.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.buf.get(self.pos).copied().ok_or_else(|| {
            StoreError::corruption(format!("truncated buffer: no byte at offset {}", self.pos))
        })
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Ok(b)
    }

    read_be!(read_i8, i8);
    read_be!(read_i16, i16);
    read_be!(read_u16, u16);
    read_be!(read_i32, i32);
    read_be!(read_u32, u32);
    read_be!(read_i64, i64);
    read_be!(read_f32, f32);
    read_be!(read_f64, f64);

    /// Fail if any bytes are left over.
    pub fn expect_end(&self, what: &str) -> Result<()> {
        if !self.is_empty() {
            return Err(StoreError::corruption(format!(
                "{}: {} trailing bytes",
                what,
                self.remaining()
            )));
        }
        Ok(())
    }
}
