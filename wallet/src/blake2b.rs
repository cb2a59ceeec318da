//! A convenience module for hashing things with BLAKE2b.
//!
//! Everything the wallet hashes is a short concatenation of fixed-width
//! fields, so the helpers take slices of input segments and hash them
//! without allocating.

use blake2::{
    digest::{consts::U32, Mac, Update, VariableOutput},
    Blake2bMac, Blake2bVar,
};

/// Keyed BLAKE2b with a 32-byte output, used for the key-wrap keystream.
type KeyedBlake2b256 = Blake2bMac<U32>;

/// BLAKE2b-256 digest of the input segments concatenated together.
pub fn hash32(inputs: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2bVar::new(32).expect("32 is a valid output size");
    for input in inputs {
        hasher.update(input);
    }
    let mut out = [0u8; 32];
    hasher
        .finalize_variable(&mut out)
        .expect("output buffer matches");
    out
}

/// BLAKE2b-64 digest of the input segments, interpreted as a little-endian
/// 64-bit integer. This is the work-digest form.
pub fn hash8(inputs: &[&[u8]]) -> u64 {
    let mut hasher = Blake2bVar::new(8).expect("8 is a valid output size");
    for input in inputs {
        hasher.update(input);
    }
    let mut out = [0u8; 8];
    hasher
        .finalize_variable(&mut out)
        .expect("output buffer matches");
    u64::from_le_bytes(out)
}

/// Keyed BLAKE2b-256 over the input segments.
pub fn mac32(key: &[u8; 32], inputs: &[&[u8]]) -> [u8; 32] {
    let mut mac = KeyedBlake2b256::new_from_slice(key)
        .expect("32-byte keys are accepted");
    for input in inputs {
        Mac::update(&mut mac, input);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}
