//! Backing files and the piece layout.
//!
//! The disk engine only talks to storage through the traits defined here:
//!
//! - [`PieceMapper`] - Maps a piece to its ordered file segments
//! - [`FileInfo`] - Per-file metadata (length, skip flag, access mode)
//! - [`CacheFile`] - The physical file behind a [`FileInfo`]
//! - [`DiskAccessController`] - Schedules physical reads and writes
//!
//! Concrete implementations are bundled for the common case of plain files
//! on a local filesystem: [`PieceMap`] with [`TorrentFile`]s backed by
//! [`FsCacheFile`]s, scheduled by [`QueuedDiskAccess`].
//!
//! # Examples
//!
//! ```no_run
//! use rbit_disk::storage::{FileEntry, PieceMap, PieceMapper};
//! use std::path::{Path, PathBuf};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let files = vec![
//!     FileEntry::new(PathBuf::from("file1.txt"), 1000, 0),
//!     FileEntry::new(PathBuf::from("file2.txt"), 500, 1000),
//! ];
//!
//! let map = PieceMap::open(Path::new("./downloads"), files, 512)?;
//! assert_eq!(map.piece_count(), 3);
//!
//! // Piece 1 starts in the first file and ends in the second.
//! let segments = map.piece_list(1);
//! assert_eq!(segments.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! [`PieceMap::open`] rejects file paths containing `..` or absolute paths.

mod access;
mod error;
mod file;
mod fs;
mod piece_map;

pub use access::{AccessStats, DiskAccessController, QueuedDiskAccess};
pub use error::StorageError;
pub use file::{
    AccessMode, CacheFile, CachePolicy, FileInfo, PieceList, PieceMapEntry, PieceMapper,
    StorageType, UserData,
};
pub use fs::FsCacheFile;
pub use piece_map::{FileEntry, PieceMap, TorrentFile};
