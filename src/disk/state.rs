//! In-memory implementations of the disk context traits.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::error;

use super::context::{
    AllocationPermit, DiskEvents, FailureSink, HashSource, PieceStates, RecheckInstance,
    RecheckScheduler,
};
use super::error::{DiskError, FailureKind};

/// Done and skipped flags for every piece of a torrent.
pub struct PieceStateTable {
    done: Vec<AtomicBool>,
    skipped: Vec<AtomicBool>,
}

impl PieceStateTable {
    pub fn new(piece_count: u32) -> Self {
        Self {
            done: (0..piece_count).map(|_| AtomicBool::new(false)).collect(),
            skipped: (0..piece_count).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn set_skipped(&self, piece: u32, skipped: bool) {
        if let Some(flag) = self.skipped.get(piece as usize) {
            flag.store(skipped, Ordering::Relaxed);
        }
    }

    pub fn done_count(&self) -> usize {
        self.done
            .iter()
            .filter(|flag| flag.load(Ordering::Relaxed))
            .count()
    }

    pub fn piece_count(&self) -> u32 {
        self.done.len() as u32
    }
}

impl PieceStates for PieceStateTable {
    fn is_done(&self, piece: u32) -> bool {
        self.done
            .get(piece as usize)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    fn set_done(&self, piece: u32, done: bool) {
        if let Some(flag) = self.done.get(piece as usize) {
            flag.store(done, Ordering::Release);
        }
    }

    fn is_skipped(&self, piece: u32) -> bool {
        self.skipped
            .get(piece as usize)
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Expected piece hashes, settable after construction.
pub struct HashTable {
    hashes: RwLock<Vec<Option<Vec<u8>>>>,
}

impl HashTable {
    pub fn new(piece_count: u32) -> Self {
        Self {
            hashes: RwLock::new(vec![None; piece_count as usize]),
        }
    }

    pub fn from_hashes(hashes: Vec<Vec<u8>>) -> Self {
        Self {
            hashes: RwLock::new(hashes.into_iter().map(Some).collect()),
        }
    }

    pub fn set(&self, piece: u32, hash: Vec<u8>) {
        let mut hashes = self.hashes.write();
        let index = piece as usize;
        if index >= hashes.len() {
            hashes.resize(index + 1, None);
        }
        hashes[index] = Some(hash);
    }
}

impl HashSource for HashTable {
    fn expected_hash(&self, piece: u32) -> Option<Vec<u8>> {
        self.hashes.read().get(piece as usize).cloned().flatten()
    }
}

/// Records the first failure reported for a torrent.
#[derive(Default)]
pub struct FailureFlag {
    failure: Mutex<Option<(FailureKind, String)>>,
}

impl FailureFlag {
    pub fn is_failed(&self) -> bool {
        self.failure.lock().is_some()
    }

    pub fn failure(&self) -> Option<(FailureKind, String)> {
        self.failure.lock().clone()
    }
}

impl FailureSink for FailureFlag {
    fn set_failed(&self, kind: FailureKind, message: &str, cause: &DiskError) {
        error!("{}: {} ({:?})", message, cause, kind);
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some((kind, format!("{}: {}", message, cause)));
        }
    }
}

pub(crate) struct NoEvents;

impl DiskEvents for NoEvents {
    fn recheck_complete(&self, _explicit: bool, _cancelled: bool) {}
}

impl<F> AllocationPermit for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn permission(&self) -> bool {
        self()
    }
}

#[derive(Default)]
struct RecheckQueueState {
    next_id: u64,
    order: VecDeque<u64>,
    cancelled: HashSet<u64>,
}

/// First-come first-served recheck scheduler.
///
/// The first `max_active` registered rechecks have permission; later ones
/// wait until an earlier one unregisters.
pub struct RecheckQueue {
    max_active: usize,
    state: Arc<Mutex<RecheckQueueState>>,
}

impl RecheckQueue {
    pub fn new(max_active: usize) -> Arc<Self> {
        Arc::new(Self {
            max_active: max_active.max(1),
            state: Arc::new(Mutex::new(RecheckQueueState::default())),
        })
    }

    /// Cancels every registered recheck.
    pub fn cancel_all(&self) {
        let mut state = self.state.lock();
        let registered: Vec<u64> = state.order.iter().copied().collect();
        state.cancelled.extend(registered);
    }

    pub fn registered(&self) -> usize {
        self.state.lock().order.len()
    }
}

impl RecheckScheduler for RecheckQueue {
    fn register(&self) -> Arc<dyn RecheckInstance> {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.order.push_back(id);

        Arc::new(QueuedRecheck {
            id,
            max_active: self.max_active,
            state: Arc::clone(&self.state),
        })
    }
}

struct QueuedRecheck {
    id: u64,
    max_active: usize,
    state: Arc<Mutex<RecheckQueueState>>,
}

impl RecheckInstance for QueuedRecheck {
    fn permission(&self) -> bool {
        let state = self.state.lock();
        state
            .order
            .iter()
            .position(|&id| id == self.id)
            .is_some_and(|position| position < self.max_active)
    }

    fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled.contains(&self.id)
    }

    fn unregister(&self) {
        let mut state = self.state.lock();
        state.order.retain(|&id| id != self.id);
        state.cancelled.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recheck_queue_admits_in_order() {
        let queue = RecheckQueue::new(1);
        let first = queue.register();
        let second = queue.register();

        assert!(first.permission());
        assert!(!second.permission());

        first.unregister();
        assert!(second.permission());
        assert_eq!(queue.registered(), 1);

        queue.cancel_all();
        assert!(second.is_cancelled());
        second.unregister();
        assert_eq!(queue.registered(), 0);
    }

    #[test]
    fn test_hash_table_late_hashes() {
        let table = HashTable::new(2);
        assert_eq!(table.expected_hash(1), None);

        table.set(1, vec![7; 32]);
        table.set(4, vec![1; 20]);
        assert_eq!(table.expected_hash(1), Some(vec![7; 32]));
        assert_eq!(table.expected_hash(4), Some(vec![1; 20]));
        assert_eq!(table.expected_hash(3), None);
    }

    #[test]
    fn test_failure_flag_keeps_first() {
        let flag = FailureFlag::default();
        flag.set_failed(FailureKind::ReadError, "Disk read error", &DiskError::OutOfMemory);
        let later = DiskError::Other("later".to_string());
        flag.set_failed(FailureKind::Other, "later", &later);

        let (kind, message) = flag.failure().unwrap();
        assert_eq!(kind, FailureKind::ReadError);
        assert!(message.starts_with("Disk read error"));
    }
}
