//! Leaky pool of fixed-size relay buffers.
//!
//! Built once by the session manager and cloned into every relay task.
//! `acquire` hands out a free buffer or allocates a fresh one; dropping the
//! guard puts the buffer back unless the free list is already full, in which
//! case the buffer is simply freed. Buffers are never resized.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared handle to the pool. Cloning is cheap.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: Mutex<Vec<Box<[u8]>>>,
    buf_size: usize,
    max_free: usize,
}

impl BufferPool {
    /// Pool of `buf_size`-byte buffers keeping at most `max_free` idle ones.
    pub fn new(max_free: usize, buf_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(max_free.min(64))),
                buf_size,
                max_free,
            }),
        }
    }

    pub fn buf_size(&self) -> usize {
        self.inner.buf_size
    }

    /// Idle buffers currently held for reuse.
    pub fn free_count(&self) -> usize {
        self.lock_free().len()
    }

    pub fn acquire(&self) -> PooledBuf {
        let reused = self.lock_free().pop();
        let buf = reused.unwrap_or_else(|| vec![0u8; self.inner.buf_size].into_boxed_slice());
        PooledBuf {
            buf: Some(buf),
            pool: self.clone(),
        }
    }

    fn release(&self, buf: Box<[u8]>) {
        debug_assert_eq!(buf.len(), self.inner.buf_size, "foreign buffer released");
        let mut free = self.lock_free();
        if free.len() < self.inner.max_free {
            free.push(buf);
        }
    }

    fn lock_free(&self) -> std::sync::MutexGuard<'_, Vec<Box<[u8]>>> {
        self.inner.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A buffer on loan from a [`BufferPool`]. Returned to the pool on drop.
pub struct PooledBuf {
    buf: Option<Box<[u8]>>,
    pool: BufferPool,
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
