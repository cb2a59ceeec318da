//! The wallet core of the Tessera node.
//!
//! Owns private keys, encrypts them at rest under a user passphrase,
//! signs outgoing ledger transitions, and mines the proof-of-work nonces
//! those transitions carry. Chain state, block validation, gossip, and
//! voting live elsewhere; the wallet reaches them through the [`Ledger`]
//! and [`Scheduler`] interfaces.

/// BLAKE2b convenience functions.
pub mod blake2b;
/// Ledger state transitions: send/receive/open/change blocks.
pub mod block;
/// Wallet configuration.
pub mod config;
/// Ed25519 signing over stored seeds.
pub mod ed25519;
/// The wallet error surface.
pub mod error;
/// Passphrase key derivation and the symmetric key wrap.
pub mod kdf;
/// Interfaces to the ledger and the background scheduler.
pub mod ledger;
/// Random number generation.
pub mod rng;
/// The encrypted key store.
pub mod store;
/// Fixed-width value types.
pub mod types;
/// A wallet: one store plus its signing actions.
pub mod wallet;
/// The wallet registry and per-account action serializer.
pub mod wallets;
/// The proof-of-work pool.
pub mod work;

/// In-memory fakes for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use crate::{
    block::{Block, ChangeBlock, OpenBlock, ReceiveBlock, SendBlock},
    config::WalletsConfig,
    error::WalletError,
    ledger::{AccountInfo, Callback, Ledger, PendingInfo, Scheduler},
    rng::{Crng, OsRng},
    store::WalletStore,
    types::{Account, BlockHash, PrivateKey, Signature, WalletId},
    wallet::Wallet,
    wallets::{ActionSerializer, Wallets},
    work::{WorkPool, PUBLISH_THRESHOLD},
};
