use std::collections::BTreeSet;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex as TokioMutex, MutexGuard};

use super::file::{CacheFile, CachePolicy, StorageType};

struct OpenHandle {
    file: File,
    writable: bool,
}

/// [`CacheFile`] backed by a regular file.
///
/// The handle is opened on first use, read-only for reads, and reopened
/// read-write the first time the file is written. Reads beyond the current
/// end of file yield zeros, as for a sparse file that was never written.
pub struct FsCacheFile {
    path: PathBuf,
    storage_type: StorageType,
    handle: TokioMutex<Option<OpenHandle>>,
    completed: parking_lot::Mutex<BTreeSet<u32>>,
}

impl FsCacheFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            storage_type: StorageType::Linear,
            handle: TokioMutex::new(None),
            completed: parking_lot::Mutex::new(BTreeSet::new()),
        }
    }

    pub fn with_storage_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = storage_type;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pieces reported complete through [`CacheFile::set_piece_complete`].
    pub fn completed_pieces(&self) -> Vec<u32> {
        self.completed.lock().iter().copied().collect()
    }

    /// Flushes and drops the open handle.
    pub async fn close(&self) -> io::Result<()> {
        let mut handle = self.handle.lock().await;
        if let Some(mut open) = handle.take() {
            if open.writable {
                open.file.flush().await?;
                open.file.sync_data().await?;
            }
        }
        Ok(())
    }

    async fn ensure_parent_dirs(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn open(&self, writable: bool) -> io::Result<MutexGuard<'_, Option<OpenHandle>>> {
        let mut handle = self.handle.lock().await;

        let reopen = match handle.as_ref() {
            Some(open) => writable && !open.writable,
            None => true,
        };

        if reopen {
            let file = if writable {
                Self::ensure_parent_dirs(&self.path).await?;
                OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(false)
                    .open(&self.path)
                    .await?
            } else {
                File::open(&self.path).await?
            };
            *handle = Some(OpenHandle { file, writable });
        }

        Ok(handle)
    }
}

fn closed() -> io::Error {
    io::Error::other("file handle closed")
}

impl std::fmt::Debug for FsCacheFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsCacheFile")
            .field("path", &self.path)
            .field("storage_type", &self.storage_type)
            .finish()
    }
}

impl CacheFile for FsCacheFile {
    fn read_at<'a>(
        &'a self,
        offset: u64,
        buf: &'a mut [u8],
        policy: CachePolicy,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let mut guard = self.open(false).await?;
            let open = guard.as_mut().ok_or_else(closed)?;

            open.file.seek(SeekFrom::Start(offset)).await?;
            let mut filled = 0;
            while filled < buf.len() {
                let n = open.file.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf[filled..].fill(0);

            if policy.flush && open.writable {
                open.file.sync_data().await?;
            }
            Ok(())
        })
    }

    fn write_at<'a>(&'a self, offset: u64, buf: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let mut guard = self.open(true).await?;
            let open = guard.as_mut().ok_or_else(closed)?;

            open.file.seek(SeekFrom::Start(offset)).await?;
            open.file.write_all(buf).await?;
            open.file.flush().await
        })
    }

    fn flush(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            let mut guard = self.handle.lock().await;
            if let Some(open) = guard.as_mut() {
                if open.writable {
                    open.file.flush().await?;
                    open.file.sync_data().await?;
                }
            }
            Ok(())
        })
    }

    fn set_length(&self, length: u64) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            let guard = self.open(true).await?;
            let open = guard.as_ref().ok_or_else(closed)?;
            open.file.set_len(length).await
        })
    }

    fn length(&self) -> io::Result<u64> {
        match std::fs::metadata(&self.path) {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    fn set_piece_complete(&self, piece: u32, _data: &[u8]) -> io::Result<()> {
        self.completed.lock().insert(piece);
        Ok(())
    }
}
