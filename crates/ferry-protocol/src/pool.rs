//! Fixed-capacity buffer pooling for transfer payloads.
//!
//! Every buffer handed out by a pool has exactly the pool's canonical
//! capacity. Buffers are owned by one sender or consumer at a time and
//! come back through [`BufferPool::put`], which only accepts buffers of
//! the canonical capacity so differently sized allocations never leak
//! into the pool.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A pool of reusable, equally sized byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    /// Idle buffers.
    available: Mutex<Vec<Vec<u8>>>,
    /// Canonical buffer capacity.
    capacity: usize,
    /// Maximum number of idle buffers retained.
    max_idle: usize,
    /// Total number of buffers allocated.
    created: AtomicUsize,
    /// Number of returns refused for a capacity mismatch.
    rejected: AtomicUsize,
}

impl BufferPool {
    /// Creates a pool of `capacity`-byte buffers keeping at most `max_idle` idle.
    pub fn new(capacity: usize, max_idle: usize) -> Self {
        Self {
            available: Mutex::new(Vec::with_capacity(max_idle)),
            capacity,
            max_idle,
            created: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        }
    }

    /// Returns the canonical buffer capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Takes a buffer whose length and capacity equal the canonical size.
    pub fn get(&self) -> Vec<u8> {
        let mut buf = self.available.lock().pop().unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            Vec::with_capacity(self.capacity)
        });
        buf.resize(self.capacity, 0);
        buf
    }

    /// Returns a buffer to the pool.
    ///
    /// Returns `false` if the buffer was dropped instead, either because its
    /// capacity is not the canonical one or the pool is already full.
    pub fn put(&self, mut buf: Vec<u8>) -> bool {
        if buf.capacity() != self.capacity {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let mut available = self.available.lock();
        if available.len() >= self.max_idle {
            return false;
        }
        buf.clear();
        available.push(buf);
        true
    }

    /// Returns the number of idle buffers.
    pub fn available(&self) -> usize {
        self.available.lock().len()
    }

    /// Returns the total number of buffers allocated.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Returns the number of buffers refused for a capacity mismatch.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::Relaxed)
    }
}
