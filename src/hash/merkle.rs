use sha2::{Digest, Sha256};

/// Leaf block size of BitTorrent v2 merkle trees (16 KiB).
pub const MERKLE_BLOCK_SIZE: usize = 16384;

/// Hashes a single leaf block using SHA256.
pub fn hash_block(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Splits data into 16 KiB blocks and hashes each one.
pub fn hash_data_blocks(data: &[u8]) -> Vec<[u8; 32]> {
    data.chunks(MERKLE_BLOCK_SIZE).map(hash_block).collect()
}

/// Folds leaf hashes into a root, padding with zero hashes up to `width`
/// leaves. `width` is rounded up to a power of two.
pub fn merkle_root(leaves: Vec<[u8; 32]>, width: usize) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let width = width.max(leaves.len()).next_power_of_two();
    let mut level = leaves;
    level.resize(width, [0u8; 32]);

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }

    level[0]
}

/// Merkle root of data padded only to the next power of two.
///
/// This is the `pieces root` of a file that fits in a single piece.
pub fn compute_root(data: &[u8]) -> [u8; 32] {
    let leaves = hash_data_blocks(data);
    let width = leaves.len();
    merkle_root(leaves, width)
}

/// Merkle root of one piece layer entry.
///
/// Short pieces (the tail of a file) are padded with zero hashes to the leaf
/// count of a full `piece_length` piece.
pub fn compute_piece_root(data: &[u8], piece_length: u64) -> [u8; 32] {
    let full_piece_blocks = (piece_length as usize).div_ceil(MERKLE_BLOCK_SIZE);
    merkle_root(hash_data_blocks(data), full_piece_blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block_root_is_block_hash() {
        let data = vec![7u8; MERKLE_BLOCK_SIZE];
        assert_eq!(compute_root(&data), hash_block(&data));
    }

    #[test]
    fn test_root_pads_to_power_of_two() {
        let data = vec![1u8; MERKLE_BLOCK_SIZE * 3];
        let blocks = hash_data_blocks(&data);
        assert_eq!(blocks.len(), 3);

        let left = hash_pair(&blocks[0], &blocks[1]);
        let right = hash_pair(&blocks[2], &[0u8; 32]);
        assert_eq!(compute_root(&data), hash_pair(&left, &right));
    }

    #[test]
    fn test_piece_root_pads_to_piece_width() {
        let piece_length = (MERKLE_BLOCK_SIZE * 4) as u64;
        let data = vec![3u8; MERKLE_BLOCK_SIZE];

        let expected = {
            let leaf = hash_block(&data);
            let zero = [0u8; 32];
            hash_pair(&hash_pair(&leaf, &zero), &hash_pair(&zero, &zero))
        };
        assert_eq!(compute_piece_root(&data, piece_length), expected);
        assert_ne!(compute_piece_root(&data, piece_length), compute_root(&data));
    }

    #[test]
    fn test_empty_data() {
        assert_eq!(compute_root(&[]), [0u8; 32]);
        assert_eq!(compute_piece_root(&[], 32768), [0u8; 32]);
    }
}
