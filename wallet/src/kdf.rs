//! Passphrase key derivation and the symmetric key wrap.
//!
//! Two fixed-parameter primitives with no state of their own:
//!
//! * [`derive_pdk`] turns a passphrase and a wallet's salt into the 256-bit
//!   passphrase-derived key that unwraps the wallet master key.
//! * [`stream_xor`] is the 256-bit XOR wrap used for everything encrypted
//!   at rest (the wrapped master key, the check value, and every stored
//!   private key). It is its own inverse.

use secrecy::{Secret, Zeroize};

use crate::blake2b;

/// Argon2 memory cost in KiB. A store-level constant: changing it makes
/// existing wallet files underivable, so it must match across node versions
/// that share a wallet file.
pub const KDF_WORK: u32 = 1024;

/// The wrap IV is the first half of the wallet's 256-bit salt.
pub const IV_LEN: usize = 16;

/// Derive the passphrase-derived key: Argon2d over (passphrase, salt) with
/// `t=1, m=KDF_WORK, p=1` and a 32-byte output.
pub fn derive_pdk(passphrase: &str, salt: &[u8; 32]) -> Secret<[u8; 32]> {
    let params = argon2::Params::new(KDF_WORK, 1, 1, Some(32))
        .expect("static params are valid");
    let argon = argon2::Argon2::new(
        argon2::Algorithm::Argon2d,
        argon2::Version::V0x13,
        params,
    );
    let mut out = [0u8; 32];
    argon
        .hash_password_into(passphrase.as_bytes(), salt, &mut out)
        .expect("salt and output lengths are in range");
    let secret = Secret::new(out);
    out.zeroize();
    secret
}

/// The zero key: the PDK a freshly created store is "locked" under until
/// its first rekey canonicalizes it to the empty passphrase.
pub fn zero_key() -> Secret<[u8; 32]> {
    Secret::new([0u8; 32])
}

/// XOR `block` with a keystream generated from `(key, iv)`. Applying the
/// wrap twice with the same key and iv returns the original block.
///
/// The keystream is CTR-style: block `i` of the stream is keyed
/// BLAKE2b-256(key; iv ‖ i). Everything the wallet wraps is exactly one
/// block wide.
pub fn stream_xor(key: &[u8; 32], iv: &[u8; IV_LEN], block: &[u8; 32]) -> [u8; 32] {
    let mut out = keystream_block(key, iv, 0);
    for (out_byte, block_byte) in out.iter_mut().zip(block) {
        *out_byte ^= block_byte;
    }
    out
}

fn keystream_block(key: &[u8; 32], iv: &[u8; IV_LEN], counter: u64) -> [u8; 32] {
    blake2b::mac32(key, &[iv, &counter.to_le_bytes()])
}
