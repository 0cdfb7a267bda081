/// Work hash - the proof-of-work function scored by the farm contract
///
/// The hash input is a fixed 76-byte buffer:
/// `epoch (4, BE) | nonce (8, BE) | seed (32) | farmer (32)`, hashed with Keccak256.

use sha3::{Digest, Keccak256};

/// Length of the buffer fed to Keccak256
pub const HASH_INPUT_LEN: usize = 76;

/// Compute the work hash for one nonce
pub fn compute_hash(epoch_index: u32, nonce: u64, seed: &[u8; 32], identity: &[u8; 32]) -> [u8; 32] {
    let mut input = [0u8; HASH_INPUT_LEN];
    input[0..4].copy_from_slice(&epoch_index.to_be_bytes());
    input[4..12].copy_from_slice(&nonce.to_be_bytes());
    input[12..44].copy_from_slice(seed);
    input[44..76].copy_from_slice(identity);

    let mut hasher = Keccak256::new();
    hasher.update(input);
    let result = hasher.finalize();

    let mut digest = [0u8; 32];
    digest.copy_from_slice(&result);
    digest
}

/// Count leading zero hex digits (nibbles) of a digest.
///
/// This is NOT a leading-zero-bit count: a first byte of `0x08` scores 1.
pub fn count_leading_zero_nibbles(digest: &[u8]) -> u32 {
    let mut zeros = 0;
    for &byte in digest {
        if byte == 0 {
            zeros += 2;
            continue;
        }
        if byte < 0x10 {
            zeros += 1;
        }
        break;
    }
    zeros
}
