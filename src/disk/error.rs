use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("out of memory: buffer pool exhausted")]
    OutOfMemory,

    #[error("read error: {0}")]
    Read(#[source] io::Error),

    #[error("write error: {0}")]
    Write(#[source] io::Error),

    #[error("file missing: {0}")]
    FileMissing(#[source] io::Error),

    #[error("hash unavailable for piece {0}")]
    HashUnavailable(u32),

    #[error("{0} is stopped")]
    Stopped(&'static str),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("{0}")]
    Other(String),
}

/// Category reported when the disk subsystem is marked failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ReadError,
    WriteError,
    FileMissing,
    Other,
}

impl DiskError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            DiskError::Read(_) => FailureKind::ReadError,
            DiskError::Write(_) => FailureKind::WriteError,
            DiskError::FileMissing(_) => FailureKind::FileMissing,
            _ => FailureKind::Other,
        }
    }

    /// True for errors caused by a component shutting down.
    pub fn is_stopped(&self) -> bool {
        matches!(self, DiskError::Stopped(_))
    }
}
