//! Budgeted buffers for disk I/O.
//!
//! Every read, write and check moves its data through a [`PooledBuffer`]
//! handed out by the shared [`BufferPool`]. A buffer is a move-only handle:
//! whoever holds it owns the bytes, and dropping it returns the allocation to
//! the pool and its bytes to the [`MemoryBudget`]. A request can therefore
//! never release its buffer twice, and every path that abandons a buffer
//! releases it.
//!
//! # Examples
//!
//! ```
//! use rbit_disk::cache::BufferPool;
//!
//! let pool = BufferPool::new(64 * 1024);
//!
//! let buffer = pool.try_acquire(16384).expect("within budget");
//! assert_eq!(buffer.len(), 16384);
//! assert_eq!(pool.budget().current_usage(), 16384);
//!
//! // Over budget requests fail instead of waiting.
//! assert!(pool.try_acquire(64 * 1024).is_none());
//!
//! drop(buffer);
//! assert_eq!(pool.budget().current_usage(), 0);
//! ```

mod buffer_pool;
mod memory_budget;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use memory_budget::{MemoryBudget, MemoryPermit};
