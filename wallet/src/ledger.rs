//! Interfaces to the rest of the node.
//!
//! The wallet never owns chain state. It reads account heads and pending
//! sends through [`Ledger`] and hands every block it constructs back
//! through the same interface; deferred work and confirmation callbacks go
//! through [`Scheduler`]. Keeping these as traits breaks the wallet ↔ node
//! cycle and lets tests drive the wallet against in-memory fakes.

use crate::{
    block::{Block, SendBlock},
    types::{Account, BlockHash},
};

/// A deferred callback.
pub type Callback = Box<dyn FnOnce() + Send>;

/// Ledger summary of one account with a chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccountInfo {
    pub head: BlockHash,
    pub representative: Account,
    pub balance: u128,
}

/// One entry of the ledger's pending-send index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingInfo {
    pub source: Account,
    pub destination: Account,
    pub amount: u128,
}

/// What the wallet consumes from the ledger and block store.
pub trait Ledger: Send + Sync {
    /// The account's head block hash, or zero if it has no chain.
    fn latest(&self, account: &Account) -> BlockHash;

    /// The account's work root: its head if it has a chain, otherwise the
    /// account identifier itself.
    fn latest_root(&self, account: &Account) -> BlockHash {
        let head = self.latest(account);
        if head.is_zero() {
            BlockHash::from(*account)
        } else {
            head
        }
    }

    fn account_info(&self, account: &Account) -> Option<AccountInfo>;

    fn account_balance(&self, account: &Account) -> u128;

    /// The account's voting weight.
    fn weight(&self, account: &Account) -> u128;

    /// Whether `hash` names a send that has not been received yet.
    fn pending_exists(&self, hash: &BlockHash) -> bool;

    /// A snapshot of the whole pending-send index.
    fn pending(&self) -> Vec<(BlockHash, PendingInfo)>;

    /// Look up the send block behind a pending entry.
    fn pending_block(&self, hash: &BlockHash) -> Option<SendBlock>;

    /// Validate, apply, and gossip a newly constructed block. `rebroadcast`
    /// is the initial gossip fan-out for freshly created blocks.
    fn process_receive_republish(&self, block: Block, rebroadcast: u32);
}

/// Deferred execution and the conflict engine's confirmation seam.
pub trait Scheduler: Send + Sync {
    /// Run `callback` later, off the caller's stack.
    fn background(&self, callback: Callback);

    /// Submit `head` to the conflict/voting engine; `confirmed` fires once
    /// the network confirms it.
    fn confirm(&self, head: BlockHash, confirmed: Callback);
}
