//! Splits piece-relative byte ranges into per-file chunks.

use std::sync::Arc;

use super::error::DiskError;
use crate::storage::{FileInfo, PieceMapEntry};

/// One physical I/O of a logical request.
///
/// Chunk `i` covers buffer bytes `chunks[i - 1].limit..chunks[i].limit`.
#[derive(Debug, Clone)]
pub(crate) struct Chunk {
    pub file: Arc<dyn FileInfo>,
    pub file_offset: u64,
    pub limit: usize,
}

/// Chunks for reading `length` bytes at `offset` of a piece.
///
/// Boundaries follow the segment lengths in the piece list. Zero-length
/// segments produce no chunk.
pub(crate) fn read_chunks(list: &[PieceMapEntry], offset: u32, length: u32) -> Vec<Chunk> {
    let offset = offset as u64;
    let length = length as usize;
    let mut chunks = Vec::new();
    let mut skipped = 0u64;
    let mut position = 0usize;

    for entry in list {
        let entry_length = entry.length as u64;
        if entry_length == 0 {
            continue;
        }
        if skipped + entry_length <= offset {
            skipped += entry_length;
            continue;
        }
        if position >= length {
            break;
        }

        let into_entry = offset.saturating_sub(skipped);
        let available = (entry_length - into_entry) as usize;
        let limit = (position + available).min(length);

        chunks.push(Chunk {
            file: Arc::clone(&entry.file),
            file_offset: entry.offset + into_entry,
            limit,
        });

        position = limit;
        skipped += entry_length;
    }

    chunks
}

/// Chunks for writing `length` bytes at `offset` of a piece.
///
/// Boundaries follow the lengths of the files themselves, so files that are
/// empty are never written. Fails if the piece list does not cover the range.
pub(crate) fn write_chunks(
    list: &[PieceMapEntry],
    offset: u32,
    length: usize,
) -> Result<Vec<Chunk>, DiskError> {
    let mut index = 0;
    let mut previous = 0u64;
    while index < list.len() && previous + list[index].length as u64 <= offset as u64 {
        previous += list[index].length as u64;
        index += 1;
    }

    let mut chunks = Vec::new();
    let mut position = 0usize;
    let mut into_entry = offset as u64 - previous;

    while position < length && index < list.len() {
        let entry = &list[index];
        let file_offset = entry.offset + into_entry;
        let available = entry.file.length().saturating_sub(file_offset) as usize;
        let limit = (position + available).min(length);

        if limit > position {
            chunks.push(Chunk {
                file: Arc::clone(&entry.file),
                file_offset,
                limit,
            });
            position = limit;
        }

        index += 1;
        into_entry = 0;
    }

    if position < length {
        return Err(DiskError::Other(format!(
            "piece map covers {} of {} bytes at offset {}",
            position, length, offset
        )));
    }

    Ok(chunks)
}
