use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::cache::PooledBuffer;
use crate::storage::UserData;

static DEBUG_TIMING: AtomicBool = AtomicBool::new(false);
static NEXT_REQUEST_ID: Mutex<u64> = parking_lot::const_mutex(0);

/// Enables per-request timing logs for every request type.
pub fn set_debug_timing(enabled: bool) {
    DEBUG_TIMING.store(enabled, Ordering::Relaxed);
}

pub fn debug_timing() -> bool {
    DEBUG_TIMING.load(Ordering::Relaxed)
}

#[derive(Debug, Clone, Default)]
struct RequestTiming {
    started: Option<(u64, Instant)>,
}

impl RequestTiming {
    fn starts(&mut self, kind: &str, piece: u32) {
        if !debug_timing() {
            return;
        }
        let id = {
            let mut next = NEXT_REQUEST_ID.lock();
            *next += 1;
            *next
        };
        trace!("{} request {} for piece {} started", kind, id, piece);
        self.started = Some((id, Instant::now()));
    }

    fn ends(&mut self, kind: &str, piece: u32, ok: bool) {
        if let Some((id, started)) = self.started.take() {
            debug!(
                "{} request {} for piece {} ended (ok={}) after {:?}",
                kind,
                id,
                piece,
                ok,
                started.elapsed()
            );
        }
    }
}

/// A read of `length` bytes at `offset` within a piece.
///
/// Requests compare equal when they address the same bytes, regardless of
/// their flags.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    piece: u32,
    offset: u32,
    length: u32,
    use_cache: bool,
    flush: bool,
    error_is_fatal: bool,
    latency_probe: bool,
    created: Instant,
    cancelled: Arc<AtomicBool>,
    timing: RequestTiming,
}

impl ReadRequest {
    pub fn new(piece: u32, offset: u32, length: u32) -> Self {
        Self {
            piece,
            offset,
            length,
            use_cache: true,
            flush: false,
            error_is_fatal: true,
            latency_probe: false,
            created: Instant::now(),
            cancelled: Arc::new(AtomicBool::new(false)),
            timing: RequestTiming::default(),
        }
    }

    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_flush(mut self, flush: bool) -> Self {
        self.flush = flush;
        self
    }

    pub fn with_error_is_fatal(mut self, fatal: bool) -> Self {
        self.error_is_fatal = fatal;
        self
    }

    pub fn with_latency_probe(mut self, probe: bool) -> Self {
        self.latency_probe = probe;
        self
    }

    pub fn piece(&self) -> u32 {
        self.piece
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    pub fn flush(&self) -> bool {
        self.flush
    }

    pub fn error_is_fatal(&self) -> bool {
        self.error_is_fatal
    }

    pub fn is_latency_probe(&self) -> bool {
        self.latency_probe
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    /// Marks the request cancelled. Shared by all clones. The disk engine
    /// does not consult this flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn request_starts(&mut self) {
        self.timing.starts("read", self.piece);
    }

    pub fn request_ends(&mut self, ok: bool) {
        self.timing.ends("read", self.piece, ok);
    }
}

impl PartialEq for ReadRequest {
    fn eq(&self, other: &Self) -> bool {
        self.piece == other.piece && self.offset == other.offset && self.length == other.length
    }
}

impl Eq for ReadRequest {}

impl Hash for ReadRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.piece.hash(state);
        self.offset.hash(state);
        self.length.hash(state);
    }
}

/// A write of a pooled buffer at `offset` within a piece.
pub struct WriteRequest {
    piece: u32,
    offset: u32,
    length: usize,
    buffer: Option<PooledBuffer>,
    user_data: Option<UserData>,
    timing: RequestTiming,
}

impl WriteRequest {
    pub fn new(piece: u32, offset: u32, buffer: PooledBuffer) -> Self {
        Self {
            piece,
            offset,
            length: buffer.len(),
            buffer: Some(buffer),
            user_data: None,
            timing: RequestTiming::default(),
        }
    }

    pub fn with_user_data(mut self, user_data: UserData) -> Self {
        self.user_data = Some(user_data);
        self
    }

    pub fn piece(&self) -> u32 {
        self.piece
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Length of the data originally attached.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }

    /// Takes ownership of the data. Returns `None` once the writer has it.
    pub fn take_buffer(&mut self) -> Option<PooledBuffer> {
        self.buffer.take()
    }

    pub fn request_starts(&mut self) {
        self.timing.starts("write", self.piece);
    }

    pub fn request_ends(&mut self, ok: bool) {
        self.timing.ends("write", self.piece, ok);
    }
}

impl fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteRequest")
            .field("piece", &self.piece)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("has_buffer", &self.buffer.is_some())
            .finish()
    }
}

/// A request to verify one piece.
#[derive(Clone)]
pub struct CheckRequest {
    piece: u32,
    user_data: Option<UserData>,
    low_priority: bool,
    ad_hoc: bool,
    explicit: bool,
    error_is_fatal: bool,
    read_flush: Option<bool>,
    hash: Option<Vec<u8>>,
    timing: RequestTiming,
}

impl CheckRequest {
    pub fn new(piece: u32) -> Self {
        Self {
            piece,
            user_data: None,
            low_priority: false,
            ad_hoc: true,
            explicit: false,
            error_is_fatal: true,
            read_flush: None,
            hash: None,
            timing: RequestTiming::default(),
        }
    }

    pub fn with_user_data(mut self, user_data: UserData) -> Self {
        self.user_data = Some(user_data);
        self
    }

    pub fn with_low_priority(mut self, low_priority: bool) -> Self {
        self.low_priority = low_priority;
        self
    }

    /// Ad-hoc checks bypass the read cache.
    pub fn with_ad_hoc(mut self, ad_hoc: bool) -> Self {
        self.ad_hoc = ad_hoc;
        self
    }

    /// Marks a check the user asked for, as opposed to one scheduled internally.
    pub fn with_explicit(mut self, explicit: bool) -> Self {
        self.explicit = explicit;
        self
    }

    pub fn with_error_is_fatal(mut self, fatal: bool) -> Self {
        self.error_is_fatal = fatal;
        self
    }

    /// Overrides the configured flush setting for the piece read.
    pub fn with_read_flush(mut self, flush: bool) -> Self {
        self.read_flush = Some(flush);
        self
    }

    pub fn piece(&self) -> u32 {
        self.piece
    }

    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }

    pub fn read_flush(&self) -> Option<bool> {
        self.read_flush
    }

    pub fn is_low_priority(&self) -> bool {
        self.low_priority
    }

    pub fn is_ad_hoc(&self) -> bool {
        self.ad_hoc
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    pub fn error_is_fatal(&self) -> bool {
        self.error_is_fatal
    }

    /// Digest computed by the last check, if it got that far.
    pub fn hash(&self) -> Option<&[u8]> {
        self.hash.as_deref()
    }

    pub(crate) fn set_hash(&mut self, hash: Vec<u8>) {
        self.hash = Some(hash);
    }

    pub fn request_starts(&mut self) {
        self.timing.starts("check", self.piece);
    }

    pub fn request_ends(&mut self, ok: bool) {
        self.timing.ends("check", self.piece, ok);
    }
}

impl fmt::Debug for CheckRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckRequest")
            .field("piece", &self.piece)
            .field("low_priority", &self.low_priority)
            .field("ad_hoc", &self.ad_hoc)
            .field("explicit", &self.explicit)
            .finish()
    }
}
