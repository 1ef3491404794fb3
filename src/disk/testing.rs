//! Test doubles for the disk engine.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use tokio::sync::{mpsc, watch};

use super::{
    CheckListener, CheckRequest, DiskContext, DiskError, DiskEvents, DiskIo, FailureFlag,
    HashTable, PieceStateTable, ReadListener, ReadRequest, RecheckQueue, WriteListener,
    WriteRequest,
};
use crate::cache::{BufferPool, PooledBuffer};
use crate::config::DiskConfig;
use crate::hash::ConcurrentHasher;
use crate::storage::{
    CacheFile, CachePolicy, DiskAccessController, FileEntry, PieceMap, PieceMapper, StorageType,
    TorrentFile,
};

pub(crate) const TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn sha1_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub(crate) fn random_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|_| rand::random::<u8>()).collect()
}

/// Backing file held in memory.
#[derive(Debug)]
pub(crate) struct MemoryFile {
    data: Mutex<Vec<u8>>,
    exists: AtomicBool,
    fail_io: AtomicBool,
    fail_length: AtomicBool,
    storage_type: StorageType,
    completed: Mutex<Vec<u32>>,
}

impl MemoryFile {
    pub(crate) fn new(len: u64, storage_type: StorageType) -> Self {
        Self {
            data: Mutex::new(vec![0; len as usize]),
            exists: AtomicBool::new(true),
            fail_io: AtomicBool::new(false),
            fail_length: AtomicBool::new(false),
            storage_type,
            completed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub(crate) fn set_contents(&self, data: &[u8]) {
        *self.data.lock() = data.to_vec();
    }

    pub(crate) fn set_exists(&self, exists: bool) {
        self.exists.store(exists, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_io(&self, fail: bool) {
        self.fail_io.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_length(&self, fail: bool) {
        self.fail_length.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn completed_pieces(&self) -> Vec<u32> {
        self.completed.lock().clone()
    }

    fn check_io(&self) -> io::Result<()> {
        if self.fail_io.load(Ordering::SeqCst) {
            Err(io::Error::other("injected failure"))
        } else {
            Ok(())
        }
    }
}

impl CacheFile for MemoryFile {
    fn read_at<'a>(
        &'a self,
        offset: u64,
        buf: &'a mut [u8],
        _policy: CachePolicy,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            self.check_io()?;
            let data = self.data.lock();
            let start = (offset as usize).min(data.len());
            let available = (data.len() - start).min(buf.len());
            buf[..available].copy_from_slice(&data[start..start + available]);
            buf[available..].fill(0);
            Ok(())
        })
    }

    fn write_at<'a>(&'a self, offset: u64, buf: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            self.check_io()?;
            let mut data = self.data.lock();
            let end = offset as usize + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[offset as usize..end].copy_from_slice(buf);
            self.exists.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn flush(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move { self.check_io() })
    }

    fn set_length(&self, length: u64) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            self.check_io()?;
            self.data.lock().resize(length as usize, 0);
            Ok(())
        })
    }

    fn length(&self) -> io::Result<u64> {
        if self.fail_length.load(Ordering::SeqCst) {
            return Err(io::Error::other("file closed"));
        }
        if !self.exists.load(Ordering::SeqCst) {
            return Ok(0);
        }
        Ok(self.data.lock().len() as u64)
    }

    fn exists(&self) -> bool {
        self.exists.load(Ordering::SeqCst)
    }

    fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    fn set_piece_complete(&self, piece: u32, _data: &[u8]) -> io::Result<()> {
        self.completed.lock().push(piece);
        Ok(())
    }
}

/// Access controller that can hold requests in flight.
pub(crate) struct TestAccess {
    open: watch::Sender<bool>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    flushed_reads: AtomicUsize,
    last_priority: AtomicI32,
}

impl TestAccess {
    pub(crate) fn new() -> Arc<Self> {
        let (open, _) = watch::channel(true);
        Arc::new(Self {
            open,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            flushed_reads: AtomicUsize::new(0),
            last_priority: AtomicI32::new(i32::MIN),
        })
    }

    /// Requests arriving from now on wait until [`release`](Self::release).
    pub(crate) fn hold(&self) {
        self.open.send_replace(false);
    }

    pub(crate) fn release(&self) {
        self.open.send_replace(true);
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Reads that asked for the written data to be flushed first.
    pub(crate) fn flushed_reads(&self) -> usize {
        self.flushed_reads.load(Ordering::SeqCst)
    }

    pub(crate) fn last_priority(&self) -> i32 {
        self.last_priority.load(Ordering::SeqCst)
    }

    async fn wait_open(&self) {
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }
}

impl DiskAccessController for TestAccess {
    fn read<'a>(
        &'a self,
        file: &'a dyn CacheFile,
        offset: u64,
        buf: &'a mut [u8],
        policy: CachePolicy,
        priority: i32,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if policy.flush {
                self.flushed_reads.fetch_add(1, Ordering::SeqCst);
            }
            self.last_priority.store(priority, Ordering::SeqCst);
            self.wait_open().await;
            file.read_at(offset, buf, policy).await
        })
    }

    fn write<'a>(
        &'a self,
        file: &'a dyn CacheFile,
        offset: u64,
        buf: &'a [u8],
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.wait_open().await;
            file.write_at(offset, buf).await
        })
    }
}

#[derive(Debug)]
pub(crate) enum Event {
    ReadCompleted {
        piece: u32,
        offset: u32,
        data: Vec<u8>,
    },
    ReadFailed {
        piece: u32,
        error: DiskError,
    },
    WriteCompleted {
        piece: u32,
    },
    WriteFailed {
        piece: u32,
        error: DiskError,
    },
    CheckCompleted {
        piece: u32,
        passed: bool,
        hash: Option<Vec<u8>>,
    },
    CheckCancelled {
        piece: u32,
    },
    CheckFailed {
        piece: u32,
        error: DiskError,
    },
}

pub(crate) enum HashHook {
    /// Stores the hash in the table, then reports success.
    Supply(Arc<HashTable>, Vec<u8>),
    /// Reports that the hash could not be fetched.
    Fail,
}

/// Listener for reads, writes and checks that forwards every outcome.
pub(crate) struct Recorder {
    events: mpsc::UnboundedSender<Event>,
    priority: i32,
    hash_hook: Option<HashHook>,
    hash_requests: AtomicUsize,
}

impl Recorder {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        Self::build(-1, None)
    }

    pub(crate) fn with_priority(priority: i32) -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        Self::build(priority, None)
    }

    pub(crate) fn with_hash_hook(hook: HashHook) -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        Self::build(-1, Some(hook))
    }

    fn build(
        priority: i32,
        hash_hook: Option<HashHook>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Self {
            events,
            priority,
            hash_hook,
            hash_requests: AtomicUsize::new(0),
        });
        (recorder, rx)
    }

    pub(crate) fn hash_requests(&self) -> usize {
        self.hash_requests.load(Ordering::SeqCst)
    }

    fn send(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

impl ReadListener for Recorder {
    fn read_completed(&self, request: &ReadRequest, data: PooledBuffer) {
        self.send(Event::ReadCompleted {
            piece: request.piece(),
            offset: request.offset(),
            data: data.to_vec(),
        });
    }

    fn read_failed(&self, request: &ReadRequest, error: DiskError) {
        self.send(Event::ReadFailed {
            piece: request.piece(),
            error,
        });
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

impl WriteListener for Recorder {
    fn write_completed(&self, request: &WriteRequest) {
        self.send(Event::WriteCompleted {
            piece: request.piece(),
        });
    }

    fn write_failed(&self, request: &WriteRequest, error: DiskError) {
        self.send(Event::WriteFailed {
            piece: request.piece(),
            error,
        });
    }
}

impl CheckListener for Recorder {
    fn check_completed(&self, request: &CheckRequest, passed: bool) {
        self.send(Event::CheckCompleted {
            piece: request.piece(),
            passed,
            hash: request.hash().map(<[u8]>::to_vec),
        });
    }

    fn check_cancelled(&self, request: &CheckRequest) {
        self.send(Event::CheckCancelled {
            piece: request.piece(),
        });
    }

    fn check_failed(&self, request: &CheckRequest, error: DiskError) {
        self.send(Event::CheckFailed {
            piece: request.piece(),
            error,
        });
    }

    fn request_hash(&self, piece: u32) -> Option<BoxFuture<'static, bool>> {
        self.hash_requests.fetch_add(1, Ordering::SeqCst);
        match self.hash_hook.as_ref()? {
            HashHook::Supply(table, hash) => {
                let table = Arc::clone(table);
                let hash = hash.clone();
                Some(Box::pin(async move {
                    table.set(piece, hash);
                    true
                }))
            }
            HashHook::Fail => Some(Box::pin(async { false })),
        }
    }
}

pub(crate) struct RecordedEvents {
    rechecks: mpsc::UnboundedSender<(bool, bool)>,
}

impl DiskEvents for RecordedEvents {
    fn recheck_complete(&self, explicit: bool, cancelled: bool) {
        let _ = self.rechecks.send((explicit, cancelled));
    }
}

pub(crate) async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a listener call")
        .expect("listener channel closed")
}

/// Polls `condition` until it holds or the test times out.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

pub(crate) struct Fixture {
    pub io: DiskIo,
    pub map: Arc<PieceMap>,
    pub files: Vec<Arc<MemoryFile>>,
    pub pieces: Arc<PieceStateTable>,
    pub hashes: Arc<HashTable>,
    pub access: Arc<TestAccess>,
    pub buffers: Arc<BufferPool>,
    pub failures: Arc<FailureFlag>,
    pub recheck: Arc<RecheckQueue>,
    pub rechecks: mpsc::UnboundedReceiver<(bool, bool)>,
}

pub(crate) struct FixtureBuilder {
    file_lengths: Vec<u64>,
    piece_length: u32,
    storage_type: StorageType,
    config: DiskConfig,
    buffer_memory: usize,
    start: bool,
}

impl FixtureBuilder {
    pub(crate) fn storage_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = storage_type;
        self
    }

    pub(crate) fn config(mut self, config: DiskConfig) -> Self {
        self.config = config;
        self
    }

    pub(crate) fn buffer_memory(mut self, bytes: usize) -> Self {
        self.buffer_memory = bytes;
        self
    }

    pub(crate) fn unstarted(mut self) -> Self {
        self.start = false;
        self
    }

    pub(crate) fn build(self) -> Fixture {
        let mut offset = 0;
        let mut files = Vec::new();
        let mut torrent_files = Vec::new();
        for (index, &length) in self.file_lengths.iter().enumerate() {
            let file = Arc::new(MemoryFile::new(length, self.storage_type));
            let entry = FileEntry::new(format!("file{}", index).into(), length, offset);
            let cache_file: Arc<dyn CacheFile> = Arc::clone(&file) as Arc<dyn CacheFile>;
            torrent_files.push(Arc::new(TorrentFile::new(
                index,
                entry,
                cache_file,
                self.piece_length,
            )));
            files.push(file);
            offset += length;
        }

        let map = Arc::new(PieceMap::new(torrent_files, self.piece_length).unwrap());
        let piece_count = map.piece_count();
        let pieces = Arc::new(PieceStateTable::new(piece_count));
        let hashes = Arc::new(HashTable::new(piece_count));
        let access = TestAccess::new();
        let buffers = BufferPool::new(self.buffer_memory);
        let failures = Arc::new(FailureFlag::default());
        let recheck = RecheckQueue::new(1);
        let (rechecks_tx, rechecks) = mpsc::unbounded_channel();

        let ctx = DiskContext::new(
            map.clone(),
            pieces.clone(),
            hashes.clone(),
            access.clone(),
            ConcurrentHasher::new(2),
            Arc::clone(&buffers),
        )
        .with_config(self.config)
        .with_failures(failures.clone())
        .with_recheck_scheduler(recheck.clone())
        .with_events(Arc::new(RecordedEvents {
            rechecks: rechecks_tx,
        }));

        let io = DiskIo::new(ctx);
        if self.start {
            io.start().unwrap();
        }

        Fixture {
            io,
            map,
            files,
            pieces,
            hashes,
            access,
            buffers,
            failures,
            recheck,
            rechecks,
        }
    }
}

impl Fixture {
    pub(crate) fn builder(file_lengths: &[u64], piece_length: u32) -> FixtureBuilder {
        FixtureBuilder {
            file_lengths: file_lengths.to_vec(),
            piece_length,
            storage_type: StorageType::Linear,
            config: DiskConfig::default(),
            buffer_memory: 64 * 1024 * 1024,
            start: true,
        }
    }

    pub(crate) fn new(file_lengths: &[u64], piece_length: u32) -> Fixture {
        Self::builder(file_lengths, piece_length).build()
    }

    /// Writes `data` across the files as one contiguous torrent.
    pub(crate) fn fill(&self, data: &[u8]) {
        let mut offset = 0;
        for file in &self.files {
            let len = file.contents().len();
            file.set_contents(&data[offset..offset + len]);
            offset += len;
        }
    }

    /// All file contents concatenated in torrent order.
    pub(crate) fn contents(&self) -> Vec<u8> {
        self.files.iter().flat_map(|file| file.contents()).collect()
    }

    pub(crate) fn buffer(&self, data: &[u8]) -> PooledBuffer {
        let mut buffer = self.buffers.try_acquire(data.len()).unwrap();
        buffer.copy_from_slice(data);
        buffer
    }
}
