//! Size-bucketed backing-buffer pool.
//!
//! Buffers come in power-of-two capacities and return to their bucket when
//! the smart handle drops, so a buffer is freed exactly once, at zero
//! remaining owners. The pool handle is cheaply cloneable and is expected to
//! be shared within a single logical thread.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::rc::{Rc, Weak};

const MIN_BUCKET_CAPACITY: usize = 64;
const BUCKET_COUNT: usize = 11; // 64 .. 64K
const MAX_RETAINED_PER_BUCKET: usize = 32;

struct PoolInner {
    buckets: Vec<Vec<Vec<u8>>>,
}

impl PoolInner {
    fn bucket_for(capacity: usize) -> Option<usize> {
        let mut size = MIN_BUCKET_CAPACITY;
        for index in 0..BUCKET_COUNT {
            if capacity <= size {
                return Some(index);
            }
            size <<= 1;
        }
        None
    }

    fn bucket_capacity(index: usize) -> usize {
        MIN_BUCKET_CAPACITY << index
    }
}

/// Shared handle to a bucketed buffer pool.
#[derive(Clone)]
pub struct PacketPool {
    inner: Rc<RefCell<PoolInner>>,
}

impl PacketPool {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(PoolInner {
                buckets: vec![Vec::new(); BUCKET_COUNT],
            })),
        }
    }

    /// Draws a buffer with at least `min_capacity` bytes of capacity.
    ///
    /// Requests beyond the largest bucket are served by a plain allocation
    /// that will not be retained on release.
    pub fn acquire(&self, min_capacity: usize) -> PooledBuffer {
        match PoolInner::bucket_for(min_capacity) {
            Some(index) => {
                let recycled = self.inner.borrow_mut().buckets[index].pop();
                let buf = recycled
                    .unwrap_or_else(|| Vec::with_capacity(PoolInner::bucket_capacity(index)));
                PooledBuffer {
                    buf: Some(buf),
                    bucket: Some(index),
                    pool: Rc::downgrade(&self.inner),
                }
            }
            None => PooledBuffer {
                buf: Some(Vec::with_capacity(min_capacity)),
                bucket: None,
                pool: Weak::new(),
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn retained(&self) -> usize {
        self.inner.borrow().buckets.iter().map(Vec::len).sum()
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A backing buffer on loan from a [`PacketPool`].
///
/// Dropping the handle returns the buffer to its size bucket.
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    bucket: Option<usize>,
    pool: Weak<RefCell<PoolInner>>,
}

impl PooledBuffer {
    /// Remaining capacity before the buffer would have to grow.
    pub fn remaining(&self) -> usize {
        let buf = self.buf.as_ref().expect("buffer already released");
        buf.capacity() - buf.len()
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer already released")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer already released")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let (Some(mut buf), Some(index)) = (self.buf.take(), self.bucket) else {
            return;
        };
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let mut inner = pool.borrow_mut();
        if inner.buckets[index].len() < MAX_RETAINED_PER_BUCKET {
            buf.clear();
            inner.buckets[index].push(buf);
        }
    }
}
