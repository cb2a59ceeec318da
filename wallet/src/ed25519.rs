//! Ed25519 signing over 32-byte seeds.
//!
//! [`ring`] wants to own key pairs, but the wallet stores bare 32-byte
//! seeds (encrypted at rest) and reconstructs the key pair whenever it
//! signs. These helpers keep that reconstruction in one place.

use ring::signature::KeyPair as _;

use crate::types::{Account, PrivateKey, Signature};

/// Derive the public key (account address) of a private key.
pub fn public_key(prv: &PrivateKey) -> Account {
    let pair = key_pair(prv);
    Account::try_from_slice(pair.public_key().as_ref())
        .expect("ed25519 public keys are 32 bytes")
}

/// Deterministically sign `msg` with `prv`.
pub fn sign(prv: &PrivateKey, msg: &[u8]) -> Signature {
    let sig = key_pair(prv).sign(msg);
    let mut bytes = [0u8; 64];
    bytes.copy_from_slice(sig.as_ref());
    Signature::from_bytes(bytes)
}

/// Check `sig` over `msg` against the signer's public key.
pub fn verify(public: &Account, msg: &[u8], sig: &Signature) -> bool {
    ring::signature::UnparsedPublicKey::new(
        &ring::signature::ED25519,
        public.as_bytes(),
    )
    .verify(msg, sig.as_bytes())
    .is_ok()
}

fn key_pair(prv: &PrivateKey) -> ring::signature::Ed25519KeyPair {
    ring::signature::Ed25519KeyPair::from_seed_unchecked(prv.expose())
        .expect("32-byte seeds are always accepted")
}
