//! Tuning constants for the disk engine.
//!
//! Buffer sizes, polling intervals and concurrency limits used by the reader,
//! writer and checker. Values follow the defaults of long-running desktop
//! clients, where allocation and rechecks must not starve regular transfers.

use std::time::Duration;

// ============================================================================
// Block and piece sizes
// ============================================================================

/// Standard block size (16KB)
pub const BLOCK_SIZE: usize = 16384;

/// Length of a v1 (SHA1) piece hash. Any other length is treated as v2.
pub const V1_HASH_LEN: usize = 20;

/// Length of a v2 (SHA256 merkle) piece hash.
pub const V2_HASH_LEN: usize = 32;

/// Default piece size used to size pooled piece buffers (2MB)
pub const DEFAULT_PIECE_SIZE: usize = 2 * 1024 * 1024;

// ============================================================================
// Buffer pool
// ============================================================================

/// Default memory available to pooled buffers (256MB)
pub const DEFAULT_BUFFER_MEMORY: usize = 256 * 1024 * 1024;

/// Upper bound on memory available to pooled buffers (1GB)
pub const MAX_BUFFER_MEMORY: usize = 1024 * 1024 * 1024;

/// Number of released buffers kept around for reuse
pub const BUFFER_POOL_SLOTS: usize = 64;

/// Released buffers larger than this are freed instead of pooled
pub const MAX_POOLED_CAPACITY: usize = 16 * 1024 * 1024;

/// Usage ratio above which the budget reports memory pressure
pub const MEMORY_PRESSURE_RATIO: f32 = 0.9;

// ============================================================================
// Allocation
// ============================================================================

/// Smallest zero-fill buffer used when pre-allocating files (1MB).
/// Must be a multiple of [`ZERO_BLOCK_ALIGN`].
pub const MIN_ZERO_BLOCK: usize = 1024 * 1024;

/// Zero-fill buffers are rounded up to this alignment
pub const ZERO_BLOCK_ALIGN: usize = 1024;

/// How often pre-allocation asks the allocation scheduler for permission
pub const ALLOCATION_PERMISSION_INTERVAL: Duration = Duration::from_millis(250);

// ============================================================================
// Concurrency
// ============================================================================

/// Maximum concurrent physical I/O operations in the bundled access controller
pub const MAX_CONCURRENT_IO: usize = 512;

/// Default number of concurrent hash computations
pub const DEFAULT_HASH_WORKERS: usize = 4;

/// Concurrent low-priority hash computations
pub const LOW_PRIORITY_HASH_WORKERS: usize = 1;

/// Concurrent piece checks during a whole-torrent recheck
pub const RECHECK_CONCURRENCY: usize = 2;

/// Rechecks allowed to run at once by the bundled recheck scheduler
pub const DEFAULT_ACTIVE_RECHECKS: usize = 1;

// ============================================================================
// Polling and logging intervals
// ============================================================================

/// Poll interval while waiting for in-flight reads before suspending
pub const SUSPEND_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll interval while a recheck waits for scheduler permission
pub const RECHECK_PERMISSION_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between progress logs while a component drains on stop
pub const STOP_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Queue length interval at which the async check dispatcher logs its backlog
pub const ASYNC_CHECK_LOG_INTERVAL: usize = 100;

// ============================================================================
// Checking
// ============================================================================

/// Recheck progress is reported in permille
pub const RECHECK_PROGRESS_SCALE: u64 = 1000;

/// Compact files with at most this many pieces may still hold complete
/// pieces in their retained areas, so they are always read when checked.
pub const COMPACT_PIECE_THRESHOLD: u32 = 2;

/// Read priority used for check reads when `checking_read_priority` is set
pub const CHECK_READ_PRIORITY_HIGH: i32 = 0;

/// Default read priority
pub const READ_PRIORITY_NORMAL: i32 = -1;
