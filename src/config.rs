//! Disk engine configuration.
//!
//! [`DiskConfig`] is a plain value: the engine never reads configuration
//! files itself. Embedders build one with [`DiskConfig::default`] and the
//! `with_*` methods and hand it to [`DiskContext`](crate::disk::DiskContext).

use crate::constants::{
    DEFAULT_BUFFER_MEMORY, DEFAULT_HASH_WORKERS, MAX_BUFFER_MEMORY, MAX_CONCURRENT_IO,
};

#[derive(Debug, Clone)]
pub struct DiskConfig {
    /// Flush file caches after every check read.
    pub flush_pieces: bool,
    /// Issue check reads at normal rather than background priority.
    pub checking_read_priority: bool,
    /// Queue check requests to a dedicated dispatcher task instead of
    /// dispatching them on the caller's task.
    pub fully_async_checks: bool,
    /// Log per-request timings at debug level.
    pub debug_timing: bool,
    /// Memory available to pooled I/O buffers, in bytes.
    pub buffer_memory: usize,
    /// Concurrent physical I/O operations allowed by the bundled controller.
    pub max_concurrent_io: usize,
    /// Concurrent hash computations allowed by the bundled hasher.
    pub hash_workers: usize,
}

impl DiskConfig {
    pub fn with_flush_pieces(mut self, enabled: bool) -> Self {
        self.flush_pieces = enabled;
        self
    }

    pub fn with_checking_read_priority(mut self, enabled: bool) -> Self {
        self.checking_read_priority = enabled;
        self
    }

    pub fn with_fully_async_checks(mut self, enabled: bool) -> Self {
        self.fully_async_checks = enabled;
        self
    }

    pub fn with_debug_timing(mut self, enabled: bool) -> Self {
        self.debug_timing = enabled;
        self
    }

    /// Sets the buffer memory budget, capped at [`MAX_BUFFER_MEMORY`].
    pub fn with_buffer_memory(mut self, bytes: usize) -> Self {
        self.buffer_memory = bytes.min(MAX_BUFFER_MEMORY);
        self
    }

    pub fn with_max_concurrent_io(mut self, limit: usize) -> Self {
        self.max_concurrent_io = limit.max(1);
        self
    }

    pub fn with_hash_workers(mut self, workers: usize) -> Self {
        self.hash_workers = workers.max(1);
        self
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            flush_pieces: false,
            checking_read_priority: false,
            fully_async_checks: false,
            debug_timing: false,
            buffer_memory: DEFAULT_BUFFER_MEMORY,
            max_concurrent_io: MAX_CONCURRENT_IO,
            hash_workers: DEFAULT_HASH_WORKERS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_clamps_limits() {
        let config = DiskConfig::default()
            .with_buffer_memory(usize::MAX)
            .with_max_concurrent_io(0)
            .with_hash_workers(0)
            .with_fully_async_checks(true);

        assert_eq!(config.buffer_memory, MAX_BUFFER_MEMORY);
        assert_eq!(config.max_concurrent_io, 1);
        assert_eq!(config.hash_workers, 1);
        assert!(config.fully_async_checks);
        assert!(!config.flush_pieces);
    }
}
