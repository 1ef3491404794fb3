//! The disk engine: reads, writes and piece verification.
//!
//! # Components
//!
//! - [`Reader`] - Reads byte ranges of pieces into pooled buffers
//! - [`Writer`] - Writes pooled buffers to pieces and pre-allocates files
//! - [`Checker`] - Verifies pieces against their expected hashes and runs
//!   whole-torrent rechecks
//! - [`DiskIo`] - Owns the three components of one torrent
//!
//! All three share a [`DiskContext`] holding the torrent's collaborators:
//! piece map, piece states, hash source, access controller, hash pool,
//! buffer pool and failure sink.
//!
//! # Completion model
//!
//! Entry points such as [`Reader::read_block`] return immediately. The
//! outcome arrives later through a listener trait, always from a spawned
//! task and exactly once per request. `stop()` is async and resolves only
//! once every dispatched operation has reported.
//!
//! A request for a piece that spans several files is split into one chunk
//! per file segment. Chunks of a request are executed strictly in order.
//!
//! # Examples
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//! use std::sync::Arc;
//!
//! use rbit_disk::config::DiskConfig;
//! use rbit_disk::disk::{DiskContext, DiskIo, HashTable, PieceStateTable, ReadRequest};
//! use rbit_disk::storage::{FileEntry, PieceMap, PieceMapper};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let files = vec![FileEntry::new(PathBuf::from("file.bin"), 65536, 0)];
//! let map = Arc::new(PieceMap::open(Path::new("./downloads"), files, 16384)?);
//! let pieces = Arc::new(PieceStateTable::new(map.piece_count()));
//! let hashes = Arc::new(HashTable::new(map.piece_count()));
//!
//! let io = DiskIo::new(DiskContext::with_defaults(map, pieces, hashes, DiskConfig::default()));
//! io.start()?;
//!
//! let data = io.reader().read(ReadRequest::new(0, 0, 16384)).await?;
//! assert_eq!(data.len(), 16384);
//!
//! io.stop().await;
//! # Ok(())
//! # }
//! ```

mod checker;
mod chunks;
mod context;
mod error;
mod manager;
mod ops;
mod reader;
mod request;
mod state;
mod writer;

pub use checker::{CheckListener, Checker};
pub use context::{
    AllocationPermit, DiskContext, DiskEvents, FailureSink, HashSource, PieceStates,
    RecheckInstance, RecheckScheduler,
};
pub use error::{DiskError, FailureKind};
pub use manager::DiskIo;
pub use reader::{ReadListener, Reader, ReaderStats};
pub use request::{debug_timing, set_debug_timing, CheckRequest, ReadRequest, WriteRequest};
pub use state::{FailureFlag, HashTable, PieceStateTable, RecheckQueue};
pub use writer::{WriteListener, Writer, WriterStats};

#[cfg(test)]
mod testing;
