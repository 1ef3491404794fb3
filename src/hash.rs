//! Piece hashing.
//!
//! The checker hands each piece to a [`HashPool`] as a [`HashJob`] and gets
//! the buffer back together with the digest. The hash version is chosen from
//! the expected hash: 20 bytes means a v1 SHA1 piece hash, anything else a v2
//! SHA256 merkle root (BEP-52).
//!
//! [`ConcurrentHasher`] is the bundled pool. It runs hashing on tokio's
//! blocking threads and bounds how many jobs run at once.

pub mod merkle;
mod pool;

pub use pool::ConcurrentHasher;

use futures::future::BoxFuture;
use sha1::{Digest, Sha1};

use crate::cache::PooledBuffer;
use crate::constants::V1_HASH_LEN;

/// Which piece hash format a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashVersion {
    /// SHA1 over the whole piece.
    V1,
    /// SHA256 merkle root over 16 KiB blocks.
    V2,
}

impl HashVersion {
    pub fn for_expected(expected: &[u8]) -> Self {
        if expected.len() == V1_HASH_LEN {
            HashVersion::V1
        } else {
            HashVersion::V2
        }
    }
}

/// A piece submitted for hashing.
#[derive(Debug)]
pub struct HashJob {
    pub buffer: PooledBuffer,
    pub version: HashVersion,
    /// Declared piece length, used to pad short v2 pieces.
    pub piece_length: u64,
    /// Length of the file the piece belongs to. Only meaningful for v2.
    pub file_length: Option<u64>,
    pub low_priority: bool,
}

impl HashJob {
    /// Computes the digest synchronously.
    pub fn digest(&self) -> Vec<u8> {
        match self.version {
            HashVersion::V1 => {
                let mut hasher = Sha1::new();
                hasher.update(&self.buffer[..]);
                hasher.finalize().to_vec()
            }
            HashVersion::V2 => match self.file_length {
                // A file smaller than a piece is hashed as its own tree.
                Some(file_length) if file_length < self.piece_length => {
                    merkle::compute_root(&self.buffer).to_vec()
                }
                _ => merkle::compute_piece_root(&self.buffer, self.piece_length).to_vec(),
            },
        }
    }
}

/// Result of a hash job.
#[derive(Debug)]
pub enum HashOutcome {
    Hashed { buffer: PooledBuffer, digest: Vec<u8> },
    /// The pool dropped the job without producing a digest.
    Cancelled,
}

/// Computes piece digests off the I/O path.
pub trait HashPool: Send + Sync {
    fn hash(&self, job: HashJob) -> BoxFuture<'static, HashOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BufferPool;
    use std::sync::Arc;

    fn job(pool: &Arc<BufferPool>, data: &[u8], version: HashVersion) -> HashJob {
        let mut buffer = pool.try_acquire(data.len()).unwrap();
        buffer.copy_from_slice(data);
        HashJob {
            buffer,
            version,
            piece_length: 32768,
            file_length: None,
            low_priority: false,
        }
    }

    #[test]
    fn test_version_from_expected_length() {
        assert_eq!(HashVersion::for_expected(&[0u8; 20]), HashVersion::V1);
        assert_eq!(HashVersion::for_expected(&[0u8; 32]), HashVersion::V2);
        assert_eq!(HashVersion::for_expected(&[]), HashVersion::V2);
    }

    #[test]
    fn test_v1_digest_is_sha1() {
        let pool = BufferPool::new(1 << 20);
        let data = vec![0u8; 16384];

        let mut hasher = Sha1::new();
        hasher.update(&data);
        let expected = hasher.finalize().to_vec();

        assert_eq!(job(&pool, &data, HashVersion::V1).digest(), expected);
    }

    #[test]
    fn test_v2_digest_depends_on_file_length() {
        let pool = BufferPool::new(1 << 20);
        let data = vec![9u8; 16384];

        let mut tail = job(&pool, &data, HashVersion::V2);
        tail.file_length = Some(65536);
        assert_eq!(tail.digest(), merkle::compute_piece_root(&data, 32768).to_vec());

        let mut small = job(&pool, &data, HashVersion::V2);
        small.file_length = Some(16384);
        assert_eq!(small.digest(), merkle::compute_root(&data).to_vec());
    }
}
