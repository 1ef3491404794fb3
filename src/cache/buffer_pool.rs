use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

use super::memory_budget::{MemoryBudget, MemoryPermit};
use crate::constants::{BUFFER_POOL_SLOTS, MAX_POOLED_CAPACITY};

/// Shared source of I/O buffers.
///
/// Released allocations are kept in a lock-free free-list and reused by later
/// requests. The number of bytes handed out at once is bounded by the pool's
/// [`MemoryBudget`].
pub struct BufferPool {
    free: ArrayQueue<BytesMut>,
    budget: Arc<MemoryBudget>,
}

impl BufferPool {
    pub fn new(memory_limit: usize) -> Arc<Self> {
        Self::with_budget(MemoryBudget::new(memory_limit))
    }

    pub fn with_budget(budget: Arc<MemoryBudget>) -> Arc<Self> {
        Arc::new(Self {
            free: ArrayQueue::new(BUFFER_POOL_SLOTS),
            budget,
        })
    }

    /// Hands out a zero-filled buffer of exactly `len` bytes.
    ///
    /// Never waits: returns `None` when the budget cannot cover `len`.
    pub fn try_acquire(self: &Arc<Self>, len: usize) -> Option<PooledBuffer> {
        let permit = match self.budget.try_allocate(len) {
            Some(permit) => permit,
            None => {
                tracing::debug!(
                    "Buffer pool exhausted: wanted {} bytes, {}/{} in use",
                    len,
                    self.budget.current_usage(),
                    self.budget.total_limit()
                );
                return None;
            }
        };

        let mut data = self.free.pop().unwrap_or_default();
        data.clear();
        data.resize(len, 0);

        Some(PooledBuffer {
            data,
            _permit: permit,
            pool: Arc::clone(self),
        })
    }

    pub fn budget(&self) -> &Arc<MemoryBudget> {
        &self.budget
    }

    pub fn free_buffers(&self) -> usize {
        self.free.len()
    }

    fn recycle(&self, data: BytesMut) {
        if data.capacity() > 0 && data.capacity() <= MAX_POOLED_CAPACITY {
            let _ = self.free.push(data);
        }
    }
}

/// A buffer on loan from a [`BufferPool`].
///
/// Dereferences to its bytes. Dropping the handle returns the allocation to
/// the pool.
pub struct PooledBuffer {
    data: BytesMut,
    _permit: MemoryPermit,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// Shortens the visible length. The budget still counts the original size
    /// until the buffer is dropped.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.recycle(std::mem::take(&mut self.data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_zeroed_on_reuse() {
        let pool = BufferPool::new(1024);

        let mut buffer = pool.try_acquire(512).unwrap();
        buffer.fill(0xAB);
        drop(buffer);
        assert_eq!(pool.free_buffers(), 1);

        let buffer = pool.try_acquire(256).unwrap();
        assert_eq!(buffer.len(), 256);
        assert!(buffer.iter().all(|&b| b == 0));
        assert_eq!(pool.free_buffers(), 0);
    }

    #[test]
    fn test_budget_is_released_on_drop() {
        let pool = BufferPool::new(1000);

        let first = pool.try_acquire(600).unwrap();
        assert!(pool.try_acquire(600).is_none());
        assert!(!pool.budget().is_under_pressure());

        drop(first);
        assert_eq!(pool.budget().current_usage(), 0);
        assert!(pool.try_acquire(600).is_some());
    }

    #[test]
    fn test_truncate_keeps_reservation() {
        let pool = BufferPool::new(1000);

        let mut buffer = pool.try_acquire(900).unwrap();
        buffer.truncate(100);
        assert_eq!(buffer.len(), 100);
        assert_eq!(pool.budget().current_usage(), 900);
        assert!(pool.budget().is_under_pressure());
    }
}
