//! Error surface of the wallet core.

use thiserror::Error;

/// Everything a wallet operation can fail with. Storage-engine failures are
/// wrapped verbatim; they indicate corruption and callers are expected to
/// abort the enclosing transaction.
#[derive(Debug, Error)]
pub enum WalletError {
    /// The passphrase-derived key in memory does not unwrap the wallet
    /// master key.
    #[error("invalid wallet password")]
    InvalidPassword,

    /// A signing operation referenced an account with no wallet entry.
    #[error("account is not in the wallet")]
    AccountNotInWallet,

    /// Send amount exceeds the account's ledger balance.
    #[error("insufficient balance")]
    InsufficientBalance,

    /// Change or send was requested for an account with no head block.
    #[error("account has no chain")]
    NoChain,

    /// Receive was requested for a hash the ledger no longer marks pending.
    #[error("block is no longer pending")]
    NotPending,

    /// A fetched private key's derived public key does not match its entry
    /// identifier.
    #[error("wallet entry is corrupt")]
    CorruptEntry,

    /// Reserved entries were missing or malformed while opening a store.
    #[error("wallet store open failed: {0}")]
    StoreOpenFailed(String),

    /// A `move`/`import` sub-operation failed. Entries moved before the
    /// failure stay moved.
    #[error("wallet import failed")]
    ImportFailed,

    /// The wallet identifier is not registered.
    #[error("unknown wallet")]
    UnknownWallet,

    #[error(transparent)]
    Storage(#[from] tessera_kv::Error),
}
