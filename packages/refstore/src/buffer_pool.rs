//! Scratch buffers reused across encode calls.
//!
//! A [`PooledBuffer`] is checked out for exclusive writing and goes back to
//! the pool (cleared) when dropped. The handle borrows the pool and is
//! neither `Send` nor `Sync`, so a buffer cannot leave the thread that is
//! running the transaction it was checked out for.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

/// Buffers that grew beyond this are freed instead of pooled.
const MAX_RETAINED_CAPACITY: usize = 64 * 1024;

const INITIAL_CAPACITY: usize = 128;

pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
}

impl BufferPool {
    /// `max_idle` bounds the number of idle buffers kept for reuse.
    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
        }
    }

    /// Take an empty buffer, recycled if one is idle.
    pub fn checkout(&self) -> PooledBuffer<'_> {
        let recycled = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        PooledBuffer {
            buf: recycled.unwrap_or_else(|| Vec::with_capacity(INITIAL_CAPACITY)),
            pool: self,
            _not_send: PhantomData,
        }
    }

    /// Number of idle buffers.
    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn give_back(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_idle {
            free.push(buf);
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("max_idle", &self.max_idle)
            .field("available", &self.available())
            .finish()
    }
}

/// A checked-out scratch buffer. Derefs to `Vec<u8>`.
pub struct PooledBuffer<'p> {
    buf: Vec<u8>,
    pool: &'p BufferPool,
    _not_send: PhantomData<*const ()>,
}

impl PooledBuffer<'_> {
    /// Keep the bytes; the allocation is not returned to the pool.
    pub fn into_vec(mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        if buf.capacity() > 0 {
            self.pool.give_back(buf);
        }
    }
}

impl fmt::Debug for PooledBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_is_empty_and_recycled() {
        let pool = BufferPool::new(2);
        {
            let mut buf = pool.checkout();
            buf.extend_from_slice(b"scratch");
            assert_eq!(buf.as_slice(), b"scratch");
        }
        assert_eq!(pool.available(), 1);
        let buf = pool.checkout();
        assert!(buf.is_empty(), "recycled buffer must come back cleared");
        assert!(buf.capacity() >= 7);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_idle_bound() {
        let pool = BufferPool::new(1);
        let a = pool.checkout();
        let b = pool.checkout();
        drop(a);
        drop(b);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_into_vec_keeps_bytes() {
        let pool = BufferPool::new(4);
        let mut buf = pool.checkout();
        buf.push(9);
        assert_eq!(buf.into_vec(), vec![9]);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_oversized_buffers_are_freed() {
        let pool = BufferPool::new(4);
        let mut buf = pool.checkout();
        buf.resize(MAX_RETAINED_CAPACITY + 1, 0);
        drop(buf);
        assert_eq!(pool.available(), 0);
    }
}
