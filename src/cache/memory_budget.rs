use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::constants::{MAX_BUFFER_MEMORY, MEMORY_PRESSURE_RATIO};

/// Upper bound on bytes held by outstanding [`MemoryPermit`]s.
pub struct MemoryBudget {
    total_limit: usize,
    current_usage: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(total_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            total_limit: total_limit.min(MAX_BUFFER_MEMORY),
            current_usage: AtomicUsize::new(0),
        })
    }

    /// Reserves `bytes`, or returns `None` if that would exceed the limit.
    pub fn try_allocate(self: &Arc<Self>, bytes: usize) -> Option<MemoryPermit> {
        let mut current = self.current_usage.load(Ordering::Relaxed);
        loop {
            if current + bytes > self.total_limit {
                return None;
            }
            match self.current_usage.compare_exchange_weak(
                current,
                current + bytes,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Some(MemoryPermit {
                        budget: Arc::clone(self),
                        bytes,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, bytes: usize) {
        self.current_usage.fetch_sub(bytes, Ordering::SeqCst);
    }

    pub fn current_usage(&self) -> usize {
        self.current_usage.load(Ordering::Relaxed)
    }

    pub fn total_limit(&self) -> usize {
        self.total_limit
    }

    pub fn is_under_pressure(&self) -> bool {
        let usage = self.current_usage.load(Ordering::Relaxed);
        usage > (self.total_limit as f32 * MEMORY_PRESSURE_RATIO) as usize
    }
}

pub struct MemoryPermit {
    budget: Arc<MemoryBudget>,
    bytes: usize,
}

impl MemoryPermit {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for MemoryPermit {
    fn drop(&mut self) {
        self.budget.release(self.bytes);
    }
}
