//! Size-classed recycling for receive buffers.
//!
//! `PSH` payloads are read into owned buffers that live on a stream's
//! receive queue until the consumer drains them. Buffers cycle through a
//! pool of power-of-two size classes instead of hitting the allocator on
//! every frame. Each class holds a bounded shelf so the pool cannot grow
//! without limit.

use std::sync::{Mutex, OnceLock, PoisonError};

/// Largest pooled buffer; matches the wire's 16-bit payload bound.
const MAX_POOLED: usize = 64 * 1024;

/// One class per power of two from 1 byte up to `MAX_POOLED`.
const NUM_CLASSES: usize = 17;

/// Buffers retained per class.
const SHELF_CAP: usize = 64;

/// A pool of reusable byte buffers, bucketed by power-of-two capacity.
pub struct BufferPool {
    shelves: [Mutex<Vec<Vec<u8>>>; NUM_CLASSES],
}

/// Class index for a requested size: the smallest power of two that fits.
fn class_of(size: usize) -> usize {
    size.next_power_of_two().trailing_zeros() as usize
}

impl BufferPool {
    pub fn new() -> BufferPool {
        BufferPool {
            shelves: std::array::from_fn(|_| Mutex::new(Vec::new())),
        }
    }

    /// Take a buffer of exactly `size` bytes, zero-filled on first use.
    /// Requests beyond the pooled range fall through to a plain allocation.
    pub fn get(&self, size: usize) -> Vec<u8> {
        if size == 0 || size > MAX_POOLED {
            return vec![0; size];
        }
        let shelf = &self.shelves[class_of(size)];
        let recycled = shelf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match recycled {
            Some(mut buf) => {
                buf.resize(size, 0);
                buf
            }
            None => {
                let mut buf = Vec::with_capacity(size.next_power_of_two());
                buf.resize(size, 0);
                buf
            }
        }
    }

    /// Return a buffer to its class. Buffers whose capacity falls outside
    /// the pooled range, and buffers arriving at a full shelf, are dropped.
    pub fn put(&self, mut buf: Vec<u8>) {
        let cap = buf.capacity();
        if cap == 0 || cap > MAX_POOLED {
            return;
        }
        // Classify by the largest power of two the capacity can serve.
        let class = cap.ilog2() as usize;
        let mut shelf = self.shelves[class]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if shelf.len() < SHELF_CAP {
            buf.clear();
            shelf.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new()
    }
}

/// The process-wide pool serving every session's receiver.
pub fn default_pool() -> &'static BufferPool {
    static POOL: OnceLock<BufferPool> = OnceLock::new();
    POOL.get_or_init(BufferPool::new)
}
