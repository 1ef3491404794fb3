use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::chunks::{write_chunks, Chunk};
use super::context::{AllocationPermit, DiskContext};
use super::error::DiskError;
use super::ops::{LatencyTracker, OpCounter, OpGuard};
use super::request::WriteRequest;
use crate::cache::PooledBuffer;
use crate::constants::{ALLOCATION_PERMISSION_INTERVAL, MIN_ZERO_BLOCK, ZERO_BLOCK_ALIGN};
use crate::storage::{AccessMode, CacheFile, FileInfo};

const COMPONENT: &str = "disk writer";

/// Receives the outcome of a write.
pub trait WriteListener: Send + Sync {
    fn write_completed(&self, request: &WriteRequest);

    fn write_failed(&self, request: &WriteRequest, error: DiskError);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub total_write_ops: u64,
    pub total_write_bytes: u64,
    /// Writes dispatched and not yet reported.
    pub async_writes: u64,
    pub async_write_bytes: u64,
}

#[derive(Default)]
struct WriterState {
    started: bool,
    stopped: bool,
    next_id: u64,
    outstanding: HashMap<u64, (u32, u64)>,
}

/// Executes piece writes and file pre-allocation.
pub struct Writer {
    ctx: DiskContext,
    state: Mutex<WriterState>,
    stopped: AtomicBool,
    writes: Arc<OpCounter>,
    latency: LatencyTracker,
    total_write_ops: AtomicU64,
    total_write_bytes: AtomicU64,
}

impl Writer {
    pub fn new(ctx: DiskContext) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            state: Mutex::new(WriterState::default()),
            stopped: AtomicBool::new(false),
            writes: OpCounter::new("writes"),
            latency: LatencyTracker::default(),
            total_write_ops: AtomicU64::new(0),
            total_write_bytes: AtomicU64::new(0),
        })
    }

    pub fn start(&self) -> Result<(), DiskError> {
        let mut state = self.state.lock();
        if state.started {
            return Err(DiskError::InvalidState("writer already started"));
        }
        if state.stopped {
            return Err(DiskError::InvalidState("writer already stopped"));
        }
        state.started = true;
        Ok(())
    }

    /// Stops the writer and waits for every dispatched write to report.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if state.stopped || !state.started {
                return;
            }
            state.stopped = true;
            self.stopped.store(true, Ordering::Release);
        }

        self.writes.drained().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Schedules a write. Writes to pieces that are already done succeed
    /// without touching the disk.
    pub fn write_block(
        self: &Arc<Self>,
        mut request: WriteRequest,
        listener: Arc<dyn WriteListener>,
    ) {
        request.request_starts();

        let Some(buffer) = request.take_buffer() else {
            let error = DiskError::Other("write request has no data".to_string());
            spawn_deliver(request, listener, Err(error));
            return;
        };

        let piece = request.piece();
        if self.ctx.pieces.is_done(piece) {
            debug!("Ignoring write to piece {}: already done", piece);
            drop(buffer);
            spawn_deliver(request, listener, Ok(()));
            return;
        }

        let list = self.ctx.piece_map.piece_list(piece);
        let chunks = match write_chunks(&list, request.offset(), buffer.len()) {
            Ok(chunks) => chunks,
            Err(error) => {
                drop(buffer);
                self.ctx
                    .failures
                    .set_failed(error.failure_kind(), "Disk write error", &error);
                spawn_deliver(request, listener, Err(error));
                return;
            }
        };

        let admitted = {
            let mut state = self.state.lock();
            if state.stopped {
                None
            } else {
                let id = state.next_id;
                state.next_id += 1;
                state.outstanding.insert(id, (piece, buffer.len() as u64));
                Some((id, self.writes.begin()))
            }
        };

        match admitted {
            Some((id, guard)) => {
                let writer = Arc::clone(self);
                tokio::spawn(async move {
                    writer
                        .dispatch(id, request, listener, buffer, chunks, guard)
                        .await;
                });
            }
            None => {
                drop(buffer);
                spawn_deliver(request, listener, Err(DiskError::Stopped(COMPONENT)));
            }
        }
    }

    /// Writes and awaits the outcome.
    pub async fn write(self: &Arc<Self>, request: WriteRequest) -> Result<(), DiskError> {
        let (tx, rx) = oneshot::channel();
        self.write_block(
            request,
            Arc::new(AwaitWrite {
                sender: Mutex::new(Some(tx)),
            }),
        );
        rx.await
            .unwrap_or_else(|_| Err(DiskError::Other("write listener dropped".to_string())))
    }

    async fn dispatch(
        self: Arc<Self>,
        id: u64,
        request: WriteRequest,
        listener: Arc<dyn WriteListener>,
        buffer: PooledBuffer,
        chunks: Vec<Chunk>,
        guard: OpGuard,
    ) {
        let length = buffer.len() as u64;
        let result = self.write_chunks(&request, buffer, &chunks).await;

        self.state.lock().outstanding.remove(&id);
        self.total_write_ops.fetch_add(1, Ordering::Relaxed);
        self.total_write_bytes.fetch_add(length, Ordering::Relaxed);

        match result {
            Ok(()) => deliver(request, listener.as_ref(), Ok(())),
            Err(error) => {
                let piece = request.piece();
                if self.ctx.pieces.is_done(piece) {
                    debug!(
                        "Write to piece {} failed after it was marked done, ignoring: {}",
                        piece, error
                    );
                    deliver(request, listener.as_ref(), Ok(()));
                } else {
                    self.ctx
                        .failures
                        .set_failed(error.failure_kind(), "Disk write error", &error);
                    deliver(request, listener.as_ref(), Err(error));
                }
            }
        }

        drop(guard);
    }

    async fn write_chunks(
        &self,
        request: &WriteRequest,
        buffer: PooledBuffer,
        chunks: &[Chunk],
    ) -> Result<(), DiskError> {
        let mut start = 0;

        for chunk in chunks {
            let file = &chunk.file;
            let cache_file = file.cache_file();

            if file.access_mode() == AccessMode::Read {
                debug!("Changing file {} to read/write", file.index());
                file.set_access_mode(AccessMode::Write)
                    .map_err(|e| classify(cache_file.as_ref(), e))?;
            }

            let access = self.latency.begin();
            self.ctx
                .access
                .write(
                    cache_file.as_ref(),
                    chunk.file_offset,
                    &buffer[start..chunk.limit],
                )
                .await
                .map_err(|e| classify(cache_file.as_ref(), e))?;
            access.complete();

            file.data_written(
                chunk.file_offset,
                (chunk.limit - start) as u64,
                request.user_data(),
            );
            start = chunk.limit;
        }

        drop(buffer);
        Ok(())
    }

    /// Fills `file` with zeros from `start_from` up to `overall_length`.
    ///
    /// Asks `allocation` for permission every 250ms and waits while it is
    /// refused. `progress` receives the number of bytes allocated so far,
    /// starting with `start_from`. Returns `Ok(false)` if the writer stopped
    /// before the file was complete.
    pub async fn zero_file<F>(
        &self,
        allocation: &dyn AllocationPermit,
        file: &dyn FileInfo,
        start_from: u64,
        overall_length: u64,
        mut progress: F,
    ) -> Result<bool, DiskError>
    where
        F: FnMut(u64) + Send,
    {
        let cache_file = file.cache_file();

        if overall_length == 0 {
            cache_file.set_length(0).await.map_err(DiskError::Write)?;
            return Ok(!self.is_stopped());
        }

        let piece_length = self.ctx.piece_map.piece_length() as usize;
        let buffer_size = piece_length
            .max(MIN_ZERO_BLOCK)
            .div_ceil(ZERO_BLOCK_ALIGN)
            * ZERO_BLOCK_ALIGN;
        let buffer = self
            .ctx
            .buffers
            .try_acquire(buffer_size)
            .ok_or(DiskError::OutOfMemory)?;

        let mut written = start_from;
        let mut remainder = overall_length.saturating_sub(start_from);
        if start_from > 0 {
            progress(start_from);
        }

        let mut last_permission_check = Instant::now();
        while remainder > 0 && !self.is_stopped() {
            if last_permission_check.elapsed() >= ALLOCATION_PERMISSION_INTERVAL {
                while !self.is_stopped() && !allocation.permission() {
                    tokio::time::sleep(ALLOCATION_PERMISSION_INTERVAL).await;
                }
                last_permission_check = Instant::now();
                if self.is_stopped() {
                    break;
                }
            }

            let write_size = remainder.min(buffer_size as u64) as usize;
            let access = self.latency.begin();
            self.ctx
                .access
                .write(cache_file.as_ref(), written, &buffer[..write_size])
                .await
                .map_err(|e| {
                    warn!("Failed to zero file {}: {}", file.index(), e);
                    DiskError::Write(e)
                })?;
            access.complete();

            written += write_size as u64;
            remainder -= write_size as u64;
            progress(write_size as u64);
        }

        drop(buffer);
        cache_file.flush().await.map_err(DiskError::Write)?;

        Ok(!self.is_stopped())
    }

    pub fn has_outstanding_write_request_for_piece(&self, piece: u32) -> bool {
        self.state
            .lock()
            .outstanding
            .values()
            .any(|&(outstanding, _)| outstanding == piece)
    }

    pub fn latency(&self) -> Duration {
        self.latency.latency()
    }

    pub fn stats(&self) -> WriterStats {
        let (async_writes, async_write_bytes) = {
            let state = self.state.lock();
            let bytes = state.outstanding.values().map(|&(_, len)| len).sum();
            (state.outstanding.len() as u64, bytes)
        };

        WriterStats {
            total_write_ops: self.total_write_ops.load(Ordering::Relaxed),
            total_write_bytes: self.total_write_bytes.load(Ordering::Relaxed),
            async_writes,
            async_write_bytes,
        }
    }
}

fn classify(file: &dyn CacheFile, error: io::Error) -> DiskError {
    if file.exists() {
        DiskError::Write(error)
    } else {
        DiskError::FileMissing(error)
    }
}

fn deliver(mut request: WriteRequest, listener: &dyn WriteListener, result: Result<(), DiskError>) {
    request.request_ends(result.is_ok());
    match result {
        Ok(()) => listener.write_completed(&request),
        Err(error) => listener.write_failed(&request, error),
    }
}

fn spawn_deliver(
    request: WriteRequest,
    listener: Arc<dyn WriteListener>,
    result: Result<(), DiskError>,
) {
    tokio::spawn(async move { deliver(request, listener.as_ref(), result) });
}

struct AwaitWrite {
    sender: Mutex<Option<oneshot::Sender<Result<(), DiskError>>>>,
}

impl WriteListener for AwaitWrite {
    fn write_completed(&self, _request: &WriteRequest) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(Ok(()));
        }
    }

    fn write_failed(&self, _request: &WriteRequest, error: DiskError) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(Err(error));
        }
    }
}
