//! Scratch buffer strategies for the zstd adapter.
//!
//! Every encode/decode call borrows one scratch buffer for the duration of
//! the call and hands it back when the [PooledBuffer] guard is dropped,
//! whichever way the call exits.

use std::fmt::Debug;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Source of scratch buffers.
///
/// Implementations must tolerate concurrent `acquire`/`release` from many threads.
pub trait BufferPool: Debug + Send + Sync {
    /// Get an empty buffer with at least `min_capacity` bytes of capacity.
    fn acquire(&self, min_capacity: usize) -> crate::Result<Vec<u8>>;

    /// Return a buffer obtained from [BufferPool::acquire].
    fn release(&self, buffer: Vec<u8>);

    /// Whether released buffers are kept for reuse.
    ///
    /// If not, callers may keep the buffer instead of copying out of it.
    fn recycles(&self) -> bool {
        true
    }
}

/// Allocate on every acquire, free on every release.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPool;

impl BufferPool for NoPool {
    fn acquire(&self, min_capacity: usize) -> crate::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(min_capacity)
            .map_err(|e| crate::Error::Resource(format!("could not allocate {min_capacity} bytes: {e}")))?;
        Ok(buffer)
    }

    fn release(&self, _buffer: Vec<u8>) {}

    fn recycles(&self) -> bool {
        false
    }
}

/// Keeps up to `max_buffers` released buffers for reuse.
#[derive(Debug)]
pub struct RecyclingBufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_buffers: usize,
}

impl RecyclingBufferPool {
    pub const DEFAULT_MAX_BUFFERS: usize = 16;

    pub fn new(max_buffers: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_buffers)),
            max_buffers,
        }
    }

    /// Number of buffers currently waiting to be reused.
    pub fn idle(&self) -> usize {
        self.free.lock().map(|f| f.len()).unwrap_or(0)
    }
}

impl Default for RecyclingBufferPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_BUFFERS)
    }
}

impl BufferPool for RecyclingBufferPool {
    fn acquire(&self, min_capacity: usize) -> crate::Result<Vec<u8>> {
        let recycled = {
            let mut free = self
                .free
                .lock()
                .map_err(|_| crate::Error::Resource("buffer pool lock poisoned".into()))?;
            // prefer the first buffer that is already large enough
            match free.iter().position(|b| b.capacity() >= min_capacity) {
                Some(idx) => Some(free.swap_remove(idx)),
                None => free.pop(),
            }
        };
        let mut buffer = recycled.unwrap_or_default();
        buffer.clear();
        buffer
            .try_reserve_exact(min_capacity)
            .map_err(|e| crate::Error::Resource(format!("could not allocate {min_capacity} bytes: {e}")))?;
        Ok(buffer)
    }

    fn release(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        if let Ok(mut free) = self.free.lock() {
            if free.len() < self.max_buffers {
                free.push(buffer);
            }
        }
    }
}

/// Scratch buffer which goes back to its pool on drop.
pub struct PooledBuffer {
    buffer: Option<Vec<u8>>,
    pool: Arc<dyn BufferPool>,
}

impl PooledBuffer {
    pub fn acquire(pool: &Arc<dyn BufferPool>, min_capacity: usize) -> crate::Result<Self> {
        let buffer = pool.acquire(min_capacity)?;
        Ok(Self {
            buffer: Some(buffer),
            pool: Arc::clone(pool),
        })
    }
}

impl PooledBuffer {
    /// The contents as an owned vector.
    ///
    /// Moves the buffer out if the pool would drop it anyway; copies otherwise.
    pub fn into_vec(mut self) -> Vec<u8> {
        if self.pool.recycles() {
            self.to_vec()
        } else {
            self.buffer.take().unwrap_or_default()
        }
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        self.buffer.as_ref().expect("buffer is only taken on drop")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buffer.as_mut().expect("buffer is only taken on drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}
