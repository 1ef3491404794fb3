use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::context::{DiskContext, RecheckInstance};
use super::error::DiskError;
use super::ops::{OpCounter, OpGuard};
use super::reader::Reader;
use super::request::{CheckRequest, ReadRequest};
use crate::constants::{
    ASYNC_CHECK_LOG_INTERVAL, CHECK_READ_PRIORITY_HIGH, COMPACT_PIECE_THRESHOLD,
    READ_PRIORITY_NORMAL, RECHECK_CONCURRENCY, RECHECK_PERMISSION_INTERVAL,
    RECHECK_PROGRESS_SCALE,
};
use crate::hash::{HashJob, HashOutcome, HashVersion};
use crate::storage::{PieceMapEntry, StorageType};

/// Receives the outcome of a piece check. Exactly one of the three
/// terminal methods is called per request.
pub trait CheckListener: Send + Sync {
    fn check_completed(&self, request: &CheckRequest, passed: bool);

    fn check_cancelled(&self, request: &CheckRequest);

    fn check_failed(&self, request: &CheckRequest, error: DiskError);

    /// Whether a hash mismatch deserves a warning.
    fn is_failure_interesting(&self) -> bool {
        true
    }

    /// Starts fetching the expected hash of `piece`, for torrents whose
    /// hashes arrive from peers. Resolves to whether the fetch succeeded.
    fn request_hash(&self, _piece: u32) -> Option<BoxFuture<'static, bool>> {
        None
    }
}

enum CheckOutcome {
    Passed,
    Failed,
    Cancelled,
    Error(DiskError),
}

/// What the files of a piece say before anything is read.
enum Presence {
    Readable,
    /// The data cannot be on disk.
    Absent,
    /// Files could not be inspected, e.g. because they are closing.
    Unknown,
}

#[derive(Default)]
struct CheckGuards {
    read: Option<OpGuard>,
    check: Option<OpGuard>,
}

struct QueuedCheck {
    request: CheckRequest,
    listener: Arc<dyn CheckListener>,
}

#[derive(Default)]
struct CheckerState {
    started: bool,
    stopped: bool,
}

/// Verifies pieces against their expected hashes.
pub struct Checker {
    ctx: DiskContext,
    reader: Arc<Reader>,
    state: Mutex<CheckerState>,
    stopped: AtomicBool,
    checking_enabled: AtomicBool,
    reads: Arc<OpCounter>,
    checks: Arc<OpCounter>,
    queue: Mutex<VecDeque<QueuedCheck>>,
    queue_notify: Notify,
    recheck_in_progress: AtomicBool,
    recheck_progress: AtomicU32,
    recheck_cancelled: AtomicBool,
}

impl Checker {
    pub fn new(ctx: DiskContext, reader: Arc<Reader>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            reader,
            state: Mutex::new(CheckerState::default()),
            stopped: AtomicBool::new(false),
            checking_enabled: AtomicBool::new(true),
            reads: OpCounter::new("check reads"),
            checks: OpCounter::new("checks"),
            queue: Mutex::new(VecDeque::new()),
            queue_notify: Notify::new(),
            recheck_in_progress: AtomicBool::new(false),
            recheck_progress: AtomicU32::new(0),
            recheck_cancelled: AtomicBool::new(false),
        })
    }

    pub fn start(self: &Arc<Self>) -> Result<(), DiskError> {
        {
            let mut state = self.state.lock();
            if state.started {
                return Err(DiskError::InvalidState("checker already started"));
            }
            if state.stopped {
                return Err(DiskError::InvalidState("checker already stopped"));
            }
            state.started = true;
        }

        if self.ctx.config.fully_async_checks {
            let checker = Arc::clone(self);
            tokio::spawn(async move { checker.run_queue().await });
        }
        Ok(())
    }

    /// Stops checking and waits for dispatched reads, then checks, to report.
    ///
    /// Checks still queued for the async dispatcher are cancelled, including
    /// those queued before the checker was started.
    pub async fn stop(self: &Arc<Self>) {
        let queued = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            self.stopped.store(true, Ordering::Release);
            std::mem::take(&mut *self.queue.lock())
        };
        self.queue_notify.notify_one();

        for check in queued {
            let guard = self.checks.begin();
            let checker = Arc::clone(self);
            tokio::spawn(async move {
                let mut request = check.request;
                request.request_starts();
                checker.report(request, check.listener.as_ref(), CheckOutcome::Cancelled);
                drop(guard);
            });
        }

        self.reads.drained().await;
        self.checks.drained().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// With checking disabled every check passes without reading.
    pub fn set_checking_enabled(&self, enabled: bool) {
        self.checking_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_checking_enabled(&self) -> bool {
        self.checking_enabled.load(Ordering::Relaxed)
    }

    /// Schedules a check of one piece.
    ///
    /// In fully-async mode the request waits for the dispatcher task spawned
    /// by [`start`](Self::start).
    pub fn enqueue_check_request(
        self: &Arc<Self>,
        request: CheckRequest,
        listener: Arc<dyn CheckListener>,
    ) {
        if self.ctx.config.fully_async_checks {
            // Queued under the state lock so stop() cannot miss the entry.
            let state = self.state.lock();
            if !state.stopped {
                self.queue
                    .lock()
                    .push_back(QueuedCheck { request, listener });
                drop(state);
                self.queue_notify.notify_one();
                return;
            }
        }
        self.spawn_check(request, listener);
    }

    /// True while a check of `piece` waits for the async dispatcher.
    pub fn has_outstanding_check_request_for_piece(&self, piece: u32) -> bool {
        self.queue
            .lock()
            .iter()
            .any(|check| check.request.piece() == piece)
    }

    async fn run_queue(self: Arc<Self>) {
        loop {
            let next = {
                let mut queue = self.queue.lock();
                let next = queue.pop_front();
                let remaining = queue.len();
                if remaining > 0 && remaining % ASYNC_CHECK_LOG_INTERVAL == 0 {
                    debug!("Async check queue: {} pending", remaining);
                }
                next
            };

            match next {
                Some(check) => self.spawn_check(check.request, check.listener),
                None => {
                    if self.is_stopped() {
                        break;
                    }
                    self.queue_notify.notified().await;
                }
            }
        }
    }

    fn spawn_check(self: &Arc<Self>, request: CheckRequest, listener: Arc<dyn CheckListener>) {
        let checker = Arc::clone(self);
        tokio::spawn(async move { checker.check(request, listener).await });
    }

    async fn check(self: Arc<Self>, mut request: CheckRequest, listener: Arc<dyn CheckListener>) {
        request.request_starts();

        let mut guards = CheckGuards::default();
        let outcome = self
            .verify(&mut request, listener.as_ref(), &mut guards)
            .await;
        self.report(request, listener.as_ref(), outcome);

        drop(guards);
    }

    fn report(
        &self,
        mut request: CheckRequest,
        listener: &dyn CheckListener,
        outcome: CheckOutcome,
    ) {
        let piece = request.piece();
        match outcome {
            CheckOutcome::Passed | CheckOutcome::Failed => {
                let passed = matches!(outcome, CheckOutcome::Passed);
                request.request_ends(true);
                self.ctx.pieces.set_done(piece, passed);

                if passed {
                    for entry in self.ctx.piece_map.piece_list(piece).iter() {
                        entry.file.data_checked(entry.offset, entry.length as u64);
                    }
                    info!("Piece {} passed hash check", piece);
                } else if listener.is_failure_interesting() {
                    warn!("Piece {} failed hash check", piece);
                } else {
                    info!("Piece {} failed hash check", piece);
                }

                listener.check_completed(&request, passed);
            }
            CheckOutcome::Cancelled => {
                request.request_ends(false);
                warn!("Piece {} hash check cancelled", piece);
                listener.check_cancelled(&request);
            }
            CheckOutcome::Error(error) => {
                request.request_ends(false);
                self.ctx.pieces.set_done(piece, false);
                warn!("Piece {} hash check failed: {}", piece, error);
                listener.check_failed(&request, error);
            }
        }
    }

    async fn verify(
        &self,
        request: &mut CheckRequest,
        listener: &dyn CheckListener,
        guards: &mut CheckGuards,
    ) -> CheckOutcome {
        if !self.is_checking_enabled() {
            return CheckOutcome::Passed;
        }

        let piece = request.piece();
        let Some(expected) = self.resolve_hash(piece, listener).await else {
            return CheckOutcome::Error(DiskError::HashUnavailable(piece));
        };

        let list = self.ctx.piece_map.piece_list(piece);
        match inspect_files(&list) {
            Presence::Readable => {}
            Presence::Absent => return CheckOutcome::Failed,
            Presence::Unknown => return CheckOutcome::Cancelled,
        }

        let flush = request
            .read_flush()
            .unwrap_or(self.ctx.config.flush_pieces);
        let read_request = ReadRequest::new(piece, 0, self.ctx.piece_map.piece_length_of(piece))
            .with_flush(flush)
            .with_use_cache(!request.is_ad_hoc())
            .with_error_is_fatal(request.error_is_fatal());
        let priority = if self.ctx.config.checking_read_priority {
            CHECK_READ_PRIORITY_HIGH
        } else {
            READ_PRIORITY_NORMAL
        };

        let Some(read_guard) = self.admit(&self.reads) else {
            return CheckOutcome::Cancelled;
        };
        guards.read = Some(read_guard);

        let mut buffer = match self.reader.read_with_priority(read_request, priority).await {
            Ok(buffer) => buffer,
            Err(error) => return CheckOutcome::Error(error),
        };

        let Some(check_guard) = self.admit(&self.checks) else {
            return CheckOutcome::Cancelled;
        };
        guards.check = Some(check_guard);
        guards.read = None;

        let version = HashVersion::for_expected(&expected);
        let piece_length = self.ctx.piece_map.piece_length() as u64;
        let file_length = match (version, list.first()) {
            (HashVersion::V2, Some(first)) => {
                // A file tail followed by padding: only the tail is hashed.
                if list.len() == 2 && (first.length as u64) < piece_length {
                    buffer.truncate(first.length as usize);
                }
                Some(first.file.length())
            }
            _ => None,
        };

        let job = HashJob {
            buffer,
            version,
            piece_length,
            file_length,
            low_priority: request.is_low_priority(),
        };
        let (buffer, digest) = match self.ctx.hasher.hash(job).await {
            HashOutcome::Hashed { buffer, digest } => (buffer, digest),
            HashOutcome::Cancelled => return CheckOutcome::Cancelled,
        };

        let passed = digest == expected;
        request.set_hash(digest);
        if !passed {
            return CheckOutcome::Failed;
        }

        for entry in list.iter() {
            let file = &entry.file;
            if file.length() == 0 && file.is_skipped() {
                continue;
            }

            let cache_file = file.cache_file();
            if !flush && file.storage_type() == StorageType::Reorder {
                if let Err(e) = cache_file
                    .flush_range(entry.offset, entry.length as u64)
                    .await
                {
                    return self.write_back_failed(piece, e);
                }
            }
            if let Err(e) = cache_file.set_piece_complete(piece, &buffer) {
                return self.write_back_failed(piece, e);
            }
        }

        CheckOutcome::Passed
    }

    fn write_back_failed(&self, piece: u32, error: std::io::Error) -> CheckOutcome {
        let error = DiskError::Io(error);
        warn!("Failed to mark piece {} complete: {}", piece, error);
        self.ctx.failures.set_failed(
            error.failure_kind(),
            "Failed to mark piece complete",
            &error,
        );
        CheckOutcome::Error(error)
    }

    async fn resolve_hash(&self, piece: u32, listener: &dyn CheckListener) -> Option<Vec<u8>> {
        if let Some(hash) = self.ctx.hashes.expected_hash(piece) {
            return Some(hash);
        }

        let fetch = listener.request_hash(piece)?;
        if !fetch.await {
            debug!("Hash request for piece {} failed", piece);
        }
        self.ctx.hashes.expected_hash(piece)
    }

    fn admit(&self, counter: &Arc<OpCounter>) -> Option<OpGuard> {
        let state = self.state.lock();
        if state.stopped {
            None
        } else {
            Some(counter.begin())
        }
    }

    /// Rechecks every piece that is done or wanted, two at a time.
    ///
    /// Registers with the recheck scheduler before returning. Each piece's
    /// outcome goes to `listener`; the end of the recheck is reported through
    /// [`DiskEvents::recheck_complete`](super::DiskEvents::recheck_complete).
    pub fn enqueue_complete_recheck_request(
        self: &Arc<Self>,
        request: CheckRequest,
        listener: Arc<dyn CheckListener>,
    ) {
        if !self.is_checking_enabled() {
            tokio::spawn(async move { listener.check_completed(&request, true) });
            return;
        }

        self.recheck_progress.store(0, Ordering::Relaxed);
        self.recheck_in_progress.store(true, Ordering::Release);
        let instance = self.ctx.recheck.register();

        let checker = Arc::clone(self);
        tokio::spawn(async move { checker.recheck(request, listener, instance).await });
    }

    async fn recheck(
        self: Arc<Self>,
        request: CheckRequest,
        listener: Arc<dyn CheckListener>,
        instance: Arc<dyn RecheckInstance>,
    ) {
        let running = Arc::new(Semaphore::new(RECHECK_CONCURRENCY));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let piece_count = self.ctx.piece_map.piece_count();
        let mut submitted = 0usize;

        for piece in 0..piece_count {
            let progress = RECHECK_PROGRESS_SCALE * piece as u64 / piece_count as u64;
            self.recheck_progress
                .store(progress as u32, Ordering::Relaxed);

            if !self.ctx.pieces.is_done(piece) && self.ctx.pieces.is_skipped(piece) {
                continue;
            }

            let Ok(permit) = Arc::clone(&running).acquire_owned().await else {
                break;
            };
            while !self.is_stopped() && !instance.permission() {
                tokio::time::sleep(RECHECK_PERMISSION_INTERVAL).await;
            }
            if self.is_stopped() {
                break;
            }

            let mut check = CheckRequest::new(piece)
                .with_read_flush(false)
                .with_low_priority(request.is_low_priority())
                .with_explicit(request.is_explicit());
            if let Some(user_data) = request.user_data() {
                check = check.with_user_data(Arc::clone(user_data));
            }

            self.enqueue_check_request(
                check,
                Arc::new(RecheckListener {
                    inner: Arc::clone(&listener),
                    slot: Mutex::new(Some((permit, done_tx.clone()))),
                }),
            );
            submitted += 1;
        }
        drop(done_tx);

        for _ in 0..submitted {
            if done_rx.recv().await.is_none() {
                break;
            }
        }

        let cancelled = instance.is_cancelled();
        self.recheck_cancelled.store(cancelled, Ordering::Relaxed);
        self.recheck_in_progress.store(false, Ordering::Release);
        instance.unregister();

        debug!(
            "Recheck complete: {} pieces checked, cancelled={}",
            submitted, cancelled
        );
        if !self.is_stopped() {
            self.ctx
                .events
                .recheck_complete(request.is_explicit(), cancelled);
        }
    }

    /// Permille progress of the running recheck, or `None` when idle.
    pub fn complete_recheck_status(&self) -> Option<u32> {
        if self.recheck_in_progress.load(Ordering::Acquire) {
            Some(self.recheck_progress.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    /// Whether the last recheck was cancelled by the scheduler.
    pub fn recheck_cancelled(&self) -> bool {
        self.recheck_cancelled.load(Ordering::Relaxed)
    }
}

fn inspect_files(list: &[PieceMapEntry]) -> Presence {
    let mut all_compact = !list.is_empty();

    for entry in list {
        match entry.file.cache_file().length() {
            Ok(length) if length < entry.offset => return Presence::Absent,
            Ok(_) => {}
            Err(e) => {
                debug!("Failed to inspect file {}: {}", entry.file.index(), e);
                return Presence::Unknown;
            }
        }

        if all_compact
            && !(entry.file.storage_type().is_compact()
                && entry.file.piece_count() > COMPACT_PIECE_THRESHOLD)
        {
            all_compact = false;
        }
    }

    if all_compact {
        Presence::Absent
    } else {
        Presence::Readable
    }
}

/// Frees a recheck slot once the wrapped check reports.
struct RecheckListener {
    inner: Arc<dyn CheckListener>,
    slot: Mutex<Option<(OwnedSemaphorePermit, mpsc::UnboundedSender<()>)>>,
}

impl RecheckListener {
    fn release(&self) {
        if let Some((permit, done)) = self.slot.lock().take() {
            drop(permit);
            let _ = done.send(());
        }
    }
}

impl CheckListener for RecheckListener {
    fn check_completed(&self, request: &CheckRequest, passed: bool) {
        self.inner.check_completed(request, passed);
        self.release();
    }

    fn check_cancelled(&self, request: &CheckRequest) {
        self.inner.check_cancelled(request);
        self.release();
    }

    fn check_failed(&self, request: &CheckRequest, error: DiskError) {
        self.inner.check_failed(request, error);
        self.release();
    }

    fn is_failure_interesting(&self) -> bool {
        self.inner.is_failure_interesting()
    }

    fn request_hash(&self, piece: u32) -> Option<BoxFuture<'static, bool>> {
        self.inner.request_hash(piece)
    }
}

impl Drop for RecheckListener {
    fn drop(&mut self) {
        self.release();
    }
}
