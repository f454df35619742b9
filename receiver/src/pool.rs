//! Bounded free-list pool for sample buffers.
//!
//! Sessions and the mixer draw their scratch buffers from here so that
//! steady-state operation performs no allocation. The pool is a fixed
//! number of equally sized buffers on a free list; exhaustion surfaces as
//! an allocation failure at session create, not a panic. Optional
//! poisoning fills released buffers with a sentinel so stale reads are
//! loud in debugging.

use std::sync::{Arc, Mutex};

/// Sentinel written into released buffers when poisoning is on.
pub const POISON_SAMPLE: f32 = 7.7e7;

/// Fixed-capacity buffer pool.
#[derive(Debug)]
pub struct BufferPool {
    // ---
    inner: Mutex<Vec<Vec<f32>>>,
    buffer_len: usize,
    poisoning: bool,
}

impl BufferPool {
    // ---
    /// Creates a pool of `count` buffers of `buffer_len` samples each.
    pub fn new(count: usize, buffer_len: usize, poisoning: bool) -> Arc<Self> {
        // ---
        let buffers = (0..count).map(|_| vec![0.0; buffer_len]).collect();
        Arc::new(Self {
            inner: Mutex::new(buffers),
            buffer_len,
            poisoning,
        })
    }

    /// Takes a zeroed buffer from the pool, or `None` when exhausted.
    pub fn acquire(self: &Arc<Self>) -> Option<PooledBuffer> {
        // ---
        let mut buf = self.inner.lock().unwrap().pop()?;
        buf.fill(0.0);
        Some(PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(self),
        })
    }

    /// Buffers currently on the free list.
    pub fn available(&self) -> usize {
        // ---
        self.inner.lock().unwrap().len()
    }

    /// Sample length of each pooled buffer.
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    fn release(&self, mut buf: Vec<f32>) {
        // ---
        if self.poisoning {
            buf.fill(POISON_SAMPLE);
        }
        self.inner.lock().unwrap().push(buf);
    }
}

/// A buffer on loan from the pool; returns itself on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    // ---
    buf: Option<Vec<f32>>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    // ---
    pub fn as_slice(&self) -> &[f32] {
        self.buf.as_ref().unwrap()
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        self.buf.as_mut().unwrap()
    }

    pub fn len(&self) -> usize {
        self.buf.as_ref().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        // ---
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
