//! rbit-disk - Disk I/O and piece verification for BitTorrent clients
//!
//! This library turns torrent-relative addresses (piece, offset, length) into
//! physical reads and writes across the files of a torrent, and verifies
//! pieces against v1 (SHA1) and v2 (BEP-52 merkle) hashes before they are
//! marked complete.
//!
//! # Modules
//!
//! - [`disk`] - Reader, writer, checker and whole-torrent recheck
//! - [`storage`] - Piece layout, backing files and disk access scheduling
//! - [`hash`] - Piece hashing and the hash worker pool
//! - [`cache`] - Budgeted pooled buffers
//! - [`config`] - Engine configuration
//! - [`constants`] - Tuning constants

pub mod cache;
pub mod config;
pub mod constants;
pub mod disk;
pub mod hash;
pub mod storage;

pub use cache::{BufferPool, MemoryBudget, PooledBuffer};
pub use config::DiskConfig;
pub use disk::{
    CheckListener, CheckRequest, Checker, DiskContext, DiskError, DiskIo, FailureKind,
    ReadListener, ReadRequest, Reader, WriteListener, WriteRequest, Writer,
};
pub use hash::{ConcurrentHasher, HashPool, HashVersion};
pub use storage::{
    CacheFile, DiskAccessController, FileEntry, FileInfo, FsCacheFile, PieceMap, PieceMapper,
    QueuedDiskAccess, StorageError, TorrentFile,
};
