use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use tokio::sync::Semaphore;

use super::file::{CacheFile, CachePolicy};

/// Schedules physical I/O against backing files.
pub trait DiskAccessController: Send + Sync {
    fn read<'a>(
        &'a self,
        file: &'a dyn CacheFile,
        offset: u64,
        buf: &'a mut [u8],
        policy: CachePolicy,
        priority: i32,
    ) -> BoxFuture<'a, io::Result<()>>;

    fn write<'a>(
        &'a self,
        file: &'a dyn CacheFile,
        offset: u64,
        buf: &'a [u8],
    ) -> BoxFuture<'a, io::Result<()>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessStats {
    pub reads: u64,
    pub bytes_read: u64,
    pub writes: u64,
    pub bytes_written: u64,
}

/// Access controller that runs requests as they arrive, bounded by a
/// semaphore. Priorities are accepted but not used for ordering.
pub struct QueuedDiskAccess {
    permits: Semaphore,
    reads: AtomicU64,
    bytes_read: AtomicU64,
    writes: AtomicU64,
    bytes_written: AtomicU64,
}

impl QueuedDiskAccess {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Semaphore::new(max_concurrent.max(1)),
            reads: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    /// Fails queued and future requests.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn stats(&self) -> AccessStats {
        AccessStats {
            reads: self.reads.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    async fn acquire(&self) -> io::Result<tokio::sync::SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| io::Error::other("disk access controller closed"))
    }
}

impl DiskAccessController for QueuedDiskAccess {
    fn read<'a>(
        &'a self,
        file: &'a dyn CacheFile,
        offset: u64,
        buf: &'a mut [u8],
        policy: CachePolicy,
        _priority: i32,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let _permit = self.acquire().await?;
            file.read_at(offset, buf, policy).await?;
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.bytes_read.fetch_add(buf.len() as u64, Ordering::Relaxed);
            Ok(())
        })
    }

    fn write<'a>(
        &'a self,
        file: &'a dyn CacheFile,
        offset: u64,
        buf: &'a [u8],
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let _permit = self.acquire().await?;
            file.write_at(offset, buf).await?;
            self.writes.fetch_add(1, Ordering::Relaxed);
            self.bytes_written
                .fetch_add(buf.len() as u64, Ordering::Relaxed);
            Ok(())
        })
    }
}
