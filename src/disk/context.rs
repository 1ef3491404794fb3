use std::sync::Arc;

use super::error::{DiskError, FailureKind};
use super::state::{FailureFlag, NoEvents, RecheckQueue};
use crate::cache::BufferPool;
use crate::config::DiskConfig;
use crate::hash::{ConcurrentHasher, HashPool};
use crate::storage::{DiskAccessController, PieceMapper, QueuedDiskAccess};

/// Verification state of every piece.
pub trait PieceStates: Send + Sync {
    fn is_done(&self, piece: u32) -> bool;

    fn set_done(&self, piece: u32, done: bool);

    /// True when the user does not want any file the piece touches.
    fn is_skipped(&self, piece: u32) -> bool;
}

/// Expected piece hashes. v2 hashes may only become known after the
/// torrent has started.
pub trait HashSource: Send + Sync {
    fn expected_hash(&self, piece: u32) -> Option<Vec<u8>>;
}

/// Receives errors that should fail the whole download.
pub trait FailureSink: Send + Sync {
    fn set_failed(&self, kind: FailureKind, message: &str, cause: &DiskError);
}

/// Gate consulted while pre-allocating files.
pub trait AllocationPermit: Send + Sync {
    fn permission(&self) -> bool;
}

/// Throttles whole-torrent rechecks across torrents.
pub trait RecheckScheduler: Send + Sync {
    fn register(&self) -> Arc<dyn RecheckInstance>;
}

/// One registered recheck.
pub trait RecheckInstance: Send + Sync {
    /// Whether the recheck may submit its next piece.
    fn permission(&self) -> bool;

    fn is_cancelled(&self) -> bool;

    fn unregister(&self);
}

/// Events raised towards the owning download.
pub trait DiskEvents: Send + Sync {
    fn recheck_complete(&self, explicit: bool, cancelled: bool);
}

/// Collaborators shared by the reader, writer and checker of one torrent.
#[derive(Clone)]
pub struct DiskContext {
    pub piece_map: Arc<dyn PieceMapper>,
    pub pieces: Arc<dyn PieceStates>,
    pub hashes: Arc<dyn HashSource>,
    pub access: Arc<dyn DiskAccessController>,
    pub hasher: Arc<dyn HashPool>,
    pub buffers: Arc<BufferPool>,
    pub failures: Arc<dyn FailureSink>,
    pub recheck: Arc<dyn RecheckScheduler>,
    pub events: Arc<dyn DiskEvents>,
    pub config: DiskConfig,
}

impl DiskContext {
    pub fn new(
        piece_map: Arc<dyn PieceMapper>,
        pieces: Arc<dyn PieceStates>,
        hashes: Arc<dyn HashSource>,
        access: Arc<dyn DiskAccessController>,
        hasher: Arc<dyn HashPool>,
        buffers: Arc<BufferPool>,
    ) -> Self {
        Self {
            piece_map,
            pieces,
            hashes,
            access,
            hasher,
            buffers,
            failures: Arc::new(FailureFlag::default()),
            recheck: RecheckQueue::new(crate::constants::DEFAULT_ACTIVE_RECHECKS),
            events: Arc::new(NoEvents),
            config: DiskConfig::default(),
        }
    }

    /// Builds a context with the bundled controller, hasher and buffer pool,
    /// sized from `config`.
    pub fn with_defaults(
        piece_map: Arc<dyn PieceMapper>,
        pieces: Arc<dyn PieceStates>,
        hashes: Arc<dyn HashSource>,
        config: DiskConfig,
    ) -> Self {
        let access = Arc::new(QueuedDiskAccess::new(config.max_concurrent_io));
        let hasher = ConcurrentHasher::new(config.hash_workers);
        let buffers = BufferPool::new(config.buffer_memory);

        Self::new(piece_map, pieces, hashes, access, hasher, buffers).with_config(config)
    }

    pub fn with_config(mut self, config: DiskConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_failures(mut self, failures: Arc<dyn FailureSink>) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_recheck_scheduler(mut self, recheck: Arc<dyn RecheckScheduler>) -> Self {
        self.recheck = recheck;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn DiskEvents>) -> Self {
        self.events = events;
        self
    }
}
