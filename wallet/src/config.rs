//! Wallet configuration.

use serde::Deserialize;

use crate::types::Account;

/// Knobs for the wallet subsystem. Deserializable from the node's config
/// file; every field has a sensible default.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WalletsConfig {
    /// Gossip fan-out for blocks this wallet creates.
    pub creation_rebroadcast: u32,
    /// Log how long each proof-of-work generation took.
    pub log_work_generation_time: bool,
    /// The voting delegate newly created wallets start out with.
    pub default_representative: Account,
}

impl Default for WalletsConfig {
    fn default() -> Self {
        Self {
            creation_rebroadcast: 2,
            log_work_generation_time: true,
            default_representative: Account::ZERO,
        }
    }
}
