use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::StorageError;
use super::file::{
    AccessMode, CacheFile, FileInfo, PieceList, PieceMapEntry, PieceMapper, UserData,
};
use super::fs::FsCacheFile;

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    pub length: u64,
    /// Offset of the file within the torrent.
    pub offset: u64,
    /// Whether this is a padding file (v2/hybrid torrents).
    pub is_padding: bool,
}

impl FileEntry {
    pub fn new(path: PathBuf, length: u64, offset: u64) -> Self {
        Self {
            path,
            length,
            offset,
            is_padding: false,
        }
    }

    pub fn padding(path: PathBuf, length: u64, offset: u64) -> Self {
        Self {
            path,
            length,
            offset,
            is_padding: true,
        }
    }
}

fn validate_file_path(file_path: &Path) -> Result<(), StorageError> {
    for component in file_path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::PathTraversal(file_path.display().to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}

/// A file of a torrent together with its backing [`CacheFile`].
#[derive(Debug)]
pub struct TorrentFile {
    index: usize,
    entry: FileEntry,
    cache_file: Arc<dyn CacheFile>,
    piece_count: u32,
    skipped: AtomicBool,
    access_mode: Mutex<AccessMode>,
    written: AtomicU64,
    checked: AtomicU64,
}

impl TorrentFile {
    pub fn new(
        index: usize,
        entry: FileEntry,
        cache_file: Arc<dyn CacheFile>,
        piece_length: u32,
    ) -> Self {
        let piece_count = if entry.length == 0 || piece_length == 0 {
            0
        } else {
            let piece_length = piece_length as u64;
            let first = entry.offset / piece_length;
            let last = (entry.offset + entry.length - 1) / piece_length;
            (last - first + 1) as u32
        };

        Self {
            index,
            skipped: AtomicBool::new(entry.is_padding),
            entry,
            cache_file,
            piece_count,
            access_mode: Mutex::new(AccessMode::Read),
            written: AtomicU64::new(0),
            checked: AtomicU64::new(0),
        }
    }

    pub fn entry(&self) -> &FileEntry {
        &self.entry
    }

    pub fn set_skipped(&self, skipped: bool) {
        self.skipped.store(skipped, Ordering::Relaxed);
    }

    /// Bytes written to this file since it was opened.
    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Bytes of this file covered by verified pieces.
    pub fn bytes_checked(&self) -> u64 {
        self.checked.load(Ordering::Relaxed)
    }
}

impl FileInfo for TorrentFile {
    fn index(&self) -> usize {
        self.index
    }

    fn cache_file(&self) -> Arc<dyn CacheFile> {
        Arc::clone(&self.cache_file)
    }

    fn length(&self) -> u64 {
        self.entry.length
    }

    fn is_skipped(&self) -> bool {
        self.skipped.load(Ordering::Relaxed)
    }

    fn piece_count(&self) -> u32 {
        self.piece_count
    }

    fn access_mode(&self) -> AccessMode {
        *self.access_mode.lock()
    }

    fn set_access_mode(&self, mode: AccessMode) -> std::io::Result<()> {
        *self.access_mode.lock() = mode;
        Ok(())
    }

    fn data_written(&self, offset: u64, length: u64, _user_data: Option<&UserData>) {
        tracing::trace!(
            "File {}: wrote {} bytes at offset {}",
            self.index,
            length,
            offset
        );
        self.written.fetch_add(length, Ordering::Relaxed);
    }

    fn data_checked(&self, _offset: u64, length: u64) {
        self.checked.fetch_add(length, Ordering::Relaxed);
    }
}

/// Piece layout of a torrent built from its ordered file list.
pub struct PieceMap {
    piece_length: u32,
    total_length: u64,
    files: Vec<Arc<TorrentFile>>,
    pieces: Vec<PieceList>,
}

impl PieceMap {
    /// Builds the layout from files in torrent order.
    ///
    /// Files must be contiguous: each one starts where the previous ended.
    pub fn new(files: Vec<Arc<TorrentFile>>, piece_length: u32) -> Result<Self, StorageError> {
        if piece_length == 0 {
            return Err(StorageError::InvalidPieceLength(piece_length));
        }

        let mut total_length = 0u64;
        for (index, file) in files.iter().enumerate() {
            if file.entry.offset != total_length {
                return Err(StorageError::FileOffsetMismatch {
                    index,
                    expected: total_length,
                    actual: file.entry.offset,
                });
            }
            total_length += file.entry.length;
        }

        let piece_count = total_length.div_ceil(piece_length as u64);
        let pieces = (0..piece_count)
            .map(|piece| Self::piece_spans(&files, piece, piece_length as u64, total_length))
            .collect();

        Ok(Self {
            piece_length,
            total_length,
            files,
            pieces,
        })
    }

    /// Builds the layout over files below `base_path`, backed by [`FsCacheFile`]s.
    ///
    /// Padding files are skipped from the start.
    pub fn open(
        base_path: &Path,
        entries: Vec<FileEntry>,
        piece_length: u32,
    ) -> Result<Self, StorageError> {
        for entry in &entries {
            validate_file_path(&entry.path)?;
        }

        let files = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let cache_file = Arc::new(FsCacheFile::new(base_path.join(&entry.path)));
                Arc::new(TorrentFile::new(index, entry, cache_file, piece_length))
            })
            .collect();

        Self::new(files, piece_length)
    }

    fn piece_spans(
        files: &[Arc<TorrentFile>],
        piece: u64,
        piece_length: u64,
        total_length: u64,
    ) -> PieceList {
        let mut current_offset = piece * piece_length;
        let mut remaining = piece_length.min(total_length - current_offset);
        let mut spans = Vec::new();

        for file in files {
            if remaining == 0 {
                break;
            }

            let entry = &file.entry;
            let file_end = entry.offset + entry.length;

            if current_offset >= entry.offset && current_offset < file_end {
                let take = remaining.min(file_end - current_offset);
                let info: Arc<dyn FileInfo> = Arc::clone(file) as Arc<dyn FileInfo>;

                spans.push(PieceMapEntry {
                    file: info,
                    offset: current_offset - entry.offset,
                    length: take as u32,
                });

                current_offset += take;
                remaining -= take;
            }
        }

        spans.into()
    }

    pub fn files(&self) -> &[Arc<TorrentFile>] {
        &self.files
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }
}

impl PieceMapper for PieceMap {
    fn piece_list(&self, piece: u32) -> PieceList {
        self.pieces
            .get(piece as usize)
            .cloned()
            .unwrap_or_else(|| Vec::<PieceMapEntry>::new().into())
    }

    fn piece_count(&self) -> u32 {
        self.pieces.len() as u32
    }

    fn piece_length(&self) -> u32 {
        self.piece_length
    }

    fn piece_length_of(&self, piece: u32) -> u32 {
        let start = piece as u64 * self.piece_length as u64;
        if start >= self.total_length {
            return 0;
        }
        (self.total_length - start).min(self.piece_length as u64) as u32
    }
}
