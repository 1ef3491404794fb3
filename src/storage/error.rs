use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid piece length: {0}")]
    InvalidPieceLength(u32),

    #[error("file {index} starts at offset {actual}, expected {expected}")]
    FileOffsetMismatch {
        index: usize,
        expected: u64,
        actual: u64,
    },

    #[error("path traversal detected in file path: {0}")]
    PathTraversal(String),
}
