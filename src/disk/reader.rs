use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::chunks::{read_chunks, Chunk};
use super::context::DiskContext;
use super::error::DiskError;
use super::ops::{LatencyTracker, OpCounter, OpGuard};
use super::request::ReadRequest;
use crate::cache::PooledBuffer;
use crate::constants::{READ_PRIORITY_NORMAL, SUSPEND_POLL_INTERVAL};
use crate::storage::{CacheFile, CachePolicy};

const COMPONENT: &str = "disk reader";

/// Receives the outcome of a read. Exactly one of
/// [`read_completed`](Self::read_completed) and
/// [`read_failed`](Self::read_failed) is called per request.
pub trait ReadListener: Send + Sync {
    fn read_completed(&self, request: &ReadRequest, data: PooledBuffer);

    fn read_failed(&self, request: &ReadRequest, error: DiskError);

    /// Priority forwarded to the disk access controller.
    fn priority(&self) -> i32 {
        READ_PRIORITY_NORMAL
    }

    /// Called after each physical chunk with the bytes it read.
    fn request_executed(&self, _bytes: u64) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub total_read_ops: u64,
    pub total_read_bytes: u64,
}

struct PendingRead {
    request: ReadRequest,
    listener: Arc<dyn ReadListener>,
    chunks: Vec<Chunk>,
}

#[derive(Default)]
struct ReaderState {
    started: bool,
    stopped: bool,
    suspended: u32,
    next_id: u64,
    outstanding: HashMap<u64, u32>,
    parked: VecDeque<PendingRead>,
}

enum Admission {
    Dispatch(u64, OpGuard, PendingRead),
    Parked(u32),
    Stopped(PendingRead),
}

/// Executes piece reads against the backing files.
pub struct Reader {
    ctx: DiskContext,
    state: Mutex<ReaderState>,
    reads: Arc<OpCounter>,
    latency: LatencyTracker,
    total_read_ops: AtomicU64,
    total_read_bytes: AtomicU64,
}

impl Reader {
    pub fn new(ctx: DiskContext) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            state: Mutex::new(ReaderState::default()),
            reads: OpCounter::new("reads"),
            latency: LatencyTracker::default(),
            total_read_ops: AtomicU64::new(0),
            total_read_bytes: AtomicU64::new(0),
        })
    }

    pub fn start(&self) -> Result<(), DiskError> {
        let mut state = self.state.lock();
        if state.started {
            return Err(DiskError::InvalidState("reader already started"));
        }
        if state.stopped {
            return Err(DiskError::InvalidState("reader already stopped"));
        }
        state.started = true;
        Ok(())
    }

    /// Stops the reader and waits for every dispatched read to report.
    ///
    /// Reads parked by [`set_suspended`](Self::set_suspended) fail with
    /// [`DiskError::Stopped`] straight away.
    pub async fn stop(&self) {
        let parked = {
            let mut state = self.state.lock();
            if state.stopped || !state.started {
                return;
            }
            state.stopped = true;
            std::mem::take(&mut state.parked)
        };

        for read in parked {
            deliver(read.request, read.listener.as_ref(), Err(DiskError::Stopped(COMPONENT)));
        }

        self.reads.drained().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Schedules a read. The outcome is delivered to `listener` from a
    /// spawned task, never from this call.
    pub fn read_block(self: &Arc<Self>, mut request: ReadRequest, listener: Arc<dyn ReadListener>) {
        request.request_starts();

        let Some(buffer) = self.ctx.buffers.try_acquire(request.length() as usize) else {
            warn!(
                "Read of piece {} failed: no buffer for {} bytes",
                request.piece(),
                request.length()
            );
            let error = DiskError::OutOfMemory;
            if request.error_is_fatal() {
                self.ctx
                    .failures
                    .set_failed(error.failure_kind(), "Disk read error", &error);
            }
            spawn_deliver(request, listener, Err(error));
            return;
        };

        let list = self.ctx.piece_map.piece_list(request.piece());
        let chunks = if list.is_empty() {
            Vec::new()
        } else {
            read_chunks(&list, request.offset(), request.length())
        };

        if chunks.is_empty() {
            warn!(
                "No chunk reads for piece {} (offset {}, length {})",
                request.piece(),
                request.offset(),
                request.length()
            );
            spawn_deliver(request, listener, Ok(buffer));
            return;
        }

        self.submit(
            PendingRead {
                request,
                listener,
                chunks,
            },
            buffer,
        );
    }

    /// Reads and awaits the data.
    pub async fn read(self: &Arc<Self>, request: ReadRequest) -> Result<PooledBuffer, DiskError> {
        self.read_with_priority(request, READ_PRIORITY_NORMAL).await
    }

    pub(crate) async fn read_with_priority(
        self: &Arc<Self>,
        request: ReadRequest,
        priority: i32,
    ) -> Result<PooledBuffer, DiskError> {
        let (tx, rx) = oneshot::channel();
        let listener = Arc::new(AwaitRead {
            sender: Mutex::new(Some(tx)),
            priority,
        });
        self.read_block(request, listener);
        rx.await
            .unwrap_or_else(|_| Err(DiskError::Other("read listener dropped".to_string())))
    }

    fn submit(self: &Arc<Self>, read: PendingRead, buffer: PooledBuffer) {
        let admission = {
            let mut state = self.state.lock();
            if state.stopped {
                Admission::Stopped(read)
            } else if state.suspended > 0 {
                let piece = read.request.piece();
                state.parked.push_back(read);
                Admission::Parked(piece)
            } else {
                let id = state.next_id;
                state.next_id += 1;
                state.outstanding.insert(id, read.request.piece());
                Admission::Dispatch(id, self.reads.begin(), read)
            }
        };

        match admission {
            Admission::Dispatch(id, guard, read) => {
                let reader = Arc::clone(self);
                tokio::spawn(async move {
                    reader.dispatch(id, read, buffer, guard).await;
                });
            }
            Admission::Parked(piece) => {
                debug!("Reader suspended, parking read of piece {}", piece);
            }
            Admission::Stopped(read) => {
                drop(buffer);
                spawn_deliver(read.request, read.listener, Err(DiskError::Stopped(COMPONENT)));
            }
        }
    }

    async fn dispatch(
        self: Arc<Self>,
        id: u64,
        read: PendingRead,
        mut buffer: PooledBuffer,
        guard: OpGuard,
    ) {
        let PendingRead {
            request,
            listener,
            chunks,
        } = read;
        let result = self
            .read_chunks(&request, listener.as_ref(), &mut buffer, &chunks)
            .await;

        self.state.lock().outstanding.remove(&id);

        match result {
            Ok(()) => deliver(request, listener.as_ref(), Ok(buffer)),
            Err(error) => {
                drop(buffer);
                if request.error_is_fatal() {
                    self.ctx
                        .failures
                        .set_failed(error.failure_kind(), "Disk read error", &error);
                }
                deliver(request, listener.as_ref(), Err(error));
            }
        }

        drop(guard);
    }

    async fn read_chunks(
        &self,
        request: &ReadRequest,
        listener: &dyn ReadListener,
        buffer: &mut PooledBuffer,
        chunks: &[Chunk],
    ) -> Result<(), DiskError> {
        let policy = CachePolicy {
            use_cache: request.use_cache(),
            flush: request.flush(),
        };
        let priority = listener.priority();
        let mut start = 0;

        for chunk in chunks {
            let cache_file = chunk.file.cache_file();
            let access = self.latency.begin();

            self.ctx
                .access
                .read(
                    cache_file.as_ref(),
                    chunk.file_offset,
                    &mut buffer[start..chunk.limit],
                    policy,
                    priority,
                )
                .await
                .map_err(|e| classify(cache_file.as_ref(), e))?;

            access.complete();
            let bytes = (chunk.limit - start) as u64;
            self.total_read_ops.fetch_add(1, Ordering::Relaxed);
            self.total_read_bytes.fetch_add(bytes, Ordering::Relaxed);
            listener.request_executed(bytes);
            start = chunk.limit;
        }

        Ok(())
    }

    /// Suspends or resumes reading. Calls nest: reads resume once every
    /// suspension has been released.
    ///
    /// Suspending waits for reads already in flight, unless the reader stops.
    pub async fn set_suspended(self: &Arc<Self>, suspend: bool) {
        let (wait, resumed) = {
            let mut state = self.state.lock();
            if suspend {
                state.suspended += 1;
                (state.suspended == 1 && !state.outstanding.is_empty(), Vec::new())
            } else {
                state.suspended = state.suspended.saturating_sub(1);
                let resumed: Vec<PendingRead> = if state.suspended == 0 {
                    state.parked.drain(..).collect()
                } else {
                    Vec::new()
                };
                (false, resumed)
            }
        };

        if wait {
            loop {
                tokio::time::sleep(SUSPEND_POLL_INTERVAL).await;
                let drained = {
                    let state = self.state.lock();
                    state.stopped || state.outstanding.is_empty()
                };
                if drained {
                    break;
                }
            }
        }

        for read in resumed {
            let Some(buffer) = self.ctx.buffers.try_acquire(read.request.length() as usize)
            else {
                spawn_deliver(read.request, read.listener, Err(DiskError::OutOfMemory));
                continue;
            };
            self.submit(read, buffer);
        }
    }

    pub fn has_outstanding_read_request_for_piece(&self, piece: u32) -> bool {
        self.state
            .lock()
            .outstanding
            .values()
            .any(|&outstanding| outstanding == piece)
    }

    /// Reads dispatched and not yet reported.
    pub fn outstanding_reads(&self) -> usize {
        self.reads.outstanding()
    }

    pub fn latency(&self) -> Duration {
        self.latency.latency()
    }

    pub fn stats(&self) -> ReaderStats {
        ReaderStats {
            total_read_ops: self.total_read_ops.load(Ordering::Relaxed),
            total_read_bytes: self.total_read_bytes.load(Ordering::Relaxed),
        }
    }
}

fn classify(file: &dyn CacheFile, error: io::Error) -> DiskError {
    if file.exists() {
        DiskError::Read(error)
    } else {
        DiskError::FileMissing(error)
    }
}

fn deliver(
    mut request: ReadRequest,
    listener: &dyn ReadListener,
    result: Result<PooledBuffer, DiskError>,
) {
    request.request_ends(result.is_ok());
    match result {
        Ok(data) => listener.read_completed(&request, data),
        Err(error) => listener.read_failed(&request, error),
    }
}

fn spawn_deliver(
    request: ReadRequest,
    listener: Arc<dyn ReadListener>,
    result: Result<PooledBuffer, DiskError>,
) {
    tokio::spawn(async move { deliver(request, listener.as_ref(), result) });
}

struct AwaitRead {
    sender: Mutex<Option<oneshot::Sender<Result<PooledBuffer, DiskError>>>>,
    priority: i32,
}

impl ReadListener for AwaitRead {
    fn read_completed(&self, _request: &ReadRequest, data: PooledBuffer) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(Ok(data));
        }
    }

    fn read_failed(&self, _request: &ReadRequest, error: DiskError) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(Err(error));
        }
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}
