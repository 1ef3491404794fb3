use std::any::Any;
use std::fmt;
use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;

/// Opaque value attached to writes, typically the peer that sent the data.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// On-disk layout of a backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageType {
    /// Bytes at their torrent offsets.
    #[default]
    Linear,
    /// Only the pieces overlapping a neighbouring file are retained.
    Compact,
    /// Pieces stored in arrival order.
    Reorder,
    /// Reorder storage that only retains boundary pieces.
    ReorderCompact,
}

impl StorageType {
    pub fn is_compact(self) -> bool {
        matches!(self, StorageType::Compact | StorageType::ReorderCompact)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    Read,
    Write,
}

/// Cache hints forwarded with physical reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub use_cache: bool,
    pub flush: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            use_cache: true,
            flush: false,
        }
    }
}

/// A backing file as seen by the disk engine.
pub trait CacheFile: Send + Sync + fmt::Debug {
    /// Fills `buf` with the bytes at `offset`.
    fn read_at<'a>(
        &'a self,
        offset: u64,
        buf: &'a mut [u8],
        policy: CachePolicy,
    ) -> BoxFuture<'a, io::Result<()>>;

    fn write_at<'a>(&'a self, offset: u64, buf: &'a [u8]) -> BoxFuture<'a, io::Result<()>>;

    fn flush(&self) -> BoxFuture<'_, io::Result<()>>;

    /// Flushes a byte range. Defaults to flushing the whole file.
    fn flush_range(&self, offset: u64, length: u64) -> BoxFuture<'_, io::Result<()>> {
        let _ = (offset, length);
        self.flush()
    }

    fn set_length(&self, length: u64) -> BoxFuture<'_, io::Result<()>>;

    /// Current physical length. A file that was never created has length 0.
    fn length(&self) -> io::Result<u64>;

    fn exists(&self) -> bool;

    fn storage_type(&self) -> StorageType;

    /// Called once a piece touching this file has been verified.
    fn set_piece_complete(&self, piece: u32, data: &[u8]) -> io::Result<()>;
}

/// Per-file torrent metadata and bookkeeping.
pub trait FileInfo: Send + Sync + fmt::Debug {
    fn index(&self) -> usize;

    fn cache_file(&self) -> Arc<dyn CacheFile>;

    /// Length of the file in the torrent.
    fn length(&self) -> u64;

    fn is_skipped(&self) -> bool;

    /// Number of pieces overlapping this file.
    fn piece_count(&self) -> u32;

    fn storage_type(&self) -> StorageType {
        self.cache_file().storage_type()
    }

    fn access_mode(&self) -> AccessMode;

    fn set_access_mode(&self, mode: AccessMode) -> io::Result<()>;

    fn data_written(&self, offset: u64, length: u64, user_data: Option<&UserData>);

    fn data_checked(&self, offset: u64, length: u64);
}

/// One file segment of a piece.
#[derive(Debug, Clone)]
pub struct PieceMapEntry {
    pub file: Arc<dyn FileInfo>,
    /// Offset of the segment within the file.
    pub offset: u64,
    pub length: u32,
}

/// Ordered file segments making up a piece.
pub type PieceList = Arc<[PieceMapEntry]>;

/// Maps pieces to the file segments that back them.
pub trait PieceMapper: Send + Sync {
    /// Segments of `piece` in torrent order. Empty for unknown pieces.
    fn piece_list(&self, piece: u32) -> PieceList;

    fn piece_count(&self) -> u32;

    /// Declared piece length.
    fn piece_length(&self) -> u32;

    /// Actual length of `piece`; only the last piece may be shorter.
    fn piece_length_of(&self, piece: u32) -> u32;
}
