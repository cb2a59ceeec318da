//! In-memory fakes for the wallet's external collaborators.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Mutex,
};

use crate::{
    block::{Block, SendBlock},
    ledger::{AccountInfo, Callback, Ledger, PendingInfo, Scheduler},
    types::{Account, BlockHash},
};

/// An in-memory ledger. Seed it with accounts and pending sends, then
/// watch which blocks the wallet publishes. Published blocks are applied
/// just enough for the wallet's own checks to hold: heads advance,
/// balances move, and receives clear their pending entries.
#[derive(Default)]
pub struct TestLedger {
    state: Mutex<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Account, AccountInfo>,
    weights: HashMap<Account, u128>,
    pending: BTreeMap<BlockHash, PendingInfo>,
    send_blocks: HashMap<BlockHash, SendBlock>,
    published: Vec<Block>,
}

impl TestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `account` a chain with the given head and balance.
    pub fn set_account(
        &self,
        account: Account,
        head: BlockHash,
        balance: u128,
    ) {
        self.state.lock().unwrap().accounts.insert(
            account,
            AccountInfo {
                head,
                representative: account,
                balance,
            },
        );
    }

    pub fn set_weight(&self, account: Account, weight: u128) {
        self.state.lock().unwrap().weights.insert(account, weight);
    }

    /// Record `send` from `source` as a pending, unreceived block.
    pub fn add_pending(&self, send: SendBlock, source: Account, amount: u128) {
        let mut state = self.state.lock().unwrap();
        let hash = send.hash();
        state.pending.insert(
            hash,
            PendingInfo {
                source,
                destination: send.destination,
                amount,
            },
        );
        state.send_blocks.insert(hash, send);
    }

    /// Every block handed to `process_receive_republish`, oldest first.
    pub fn published(&self) -> Vec<Block> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn published_count(&self) -> usize {
        self.state.lock().unwrap().published.len()
    }
}

impl Ledger for TestLedger {
    fn latest(&self, account: &Account) -> BlockHash {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(account)
            .map_or(BlockHash::ZERO, |info| info.head)
    }

    fn account_info(&self, account: &Account) -> Option<AccountInfo> {
        self.state.lock().unwrap().accounts.get(account).cloned()
    }

    fn account_balance(&self, account: &Account) -> u128 {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(account)
            .map_or(0, |info| info.balance)
    }

    fn weight(&self, account: &Account) -> u128 {
        self.state
            .lock()
            .unwrap()
            .weights
            .get(account)
            .copied()
            .unwrap_or(0)
    }

    fn pending_exists(&self, hash: &BlockHash) -> bool {
        self.state.lock().unwrap().pending.contains_key(hash)
    }

    fn pending(&self) -> Vec<(BlockHash, PendingInfo)> {
        self.state
            .lock()
            .unwrap()
            .pending
            .iter()
            .map(|(hash, info)| (*hash, info.clone()))
            .collect()
    }

    fn pending_block(&self, hash: &BlockHash) -> Option<SendBlock> {
        self.state.lock().unwrap().send_blocks.get(hash).cloned()
    }

    fn process_receive_republish(&self, block: Block, _rebroadcast: u32) {
        let mut state = self.state.lock().unwrap();
        match &block {
            Block::Send(send) => {
                let hash = send.hash();
                if let Some(source) = account_at(&state, &send.previous) {
                    let info = state.accounts.get_mut(&source).unwrap();
                    let amount = info.balance.saturating_sub(send.balance);
                    info.head = hash;
                    info.balance = send.balance;
                    state.pending.insert(
                        hash,
                        PendingInfo {
                            source,
                            destination: send.destination,
                            amount,
                        },
                    );
                    state.send_blocks.insert(hash, send.clone());
                }
            }
            Block::Receive(receive) => {
                let pending = state.pending.remove(&receive.source);
                state.send_blocks.remove(&receive.source);
                if let Some(pending) = pending {
                    if let Some(account) = account_at(&state, &receive.previous)
                    {
                        let info = state.accounts.get_mut(&account).unwrap();
                        info.head = receive.hash();
                        info.balance += pending.amount;
                    }
                }
            }
            Block::Open(open) => {
                let pending = state.pending.remove(&open.source);
                state.send_blocks.remove(&open.source);
                if let Some(pending) = pending {
                    state.accounts.insert(
                        open.account,
                        AccountInfo {
                            head: open.hash(),
                            representative: open.representative,
                            balance: pending.amount,
                        },
                    );
                }
            }
            Block::Change(change) => {
                if let Some(account) = account_at(&state, &change.previous) {
                    let info = state.accounts.get_mut(&account).unwrap();
                    info.head = change.hash();
                    info.representative = change.representative;
                }
            }
        }
        state.published.push(block);
    }
}

fn account_at(state: &LedgerState, head: &BlockHash) -> Option<Account> {
    state
        .accounts
        .iter()
        .find(|(_, info)| info.head == *head)
        .map(|(account, _)| *account)
}

/// A scheduler fake. `immediate()` runs background callbacks and fires
/// confirmations inline; `manual()` holds them for the test to drain.
pub struct TestScheduler {
    inline: bool,
    background: Mutex<VecDeque<Callback>>,
    confirms: Mutex<Vec<(BlockHash, Callback)>>,
}

impl TestScheduler {
    pub fn immediate() -> Self {
        Self {
            inline: true,
            background: Mutex::new(VecDeque::new()),
            confirms: Mutex::new(Vec::new()),
        }
    }

    pub fn manual() -> Self {
        Self {
            inline: false,
            background: Mutex::new(VecDeque::new()),
            confirms: Mutex::new(Vec::new()),
        }
    }

    /// Run every queued background callback (including ones queued by the
    /// callbacks themselves). Returns how many ran.
    pub fn run_background(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(callback) = self.background.lock().unwrap().pop_front()
            else {
                return ran;
            };
            callback();
            ran += 1;
        }
    }

    /// Fire every recorded confirmation callback. Returns how many ran.
    pub fn run_confirms(&self) -> usize {
        let confirms: Vec<_> =
            self.confirms.lock().unwrap().drain(..).collect();
        let ran = confirms.len();
        for (_, callback) in confirms {
            callback();
        }
        ran
    }
}

impl Scheduler for TestScheduler {
    fn background(&self, callback: Callback) {
        if self.inline {
            callback();
        } else {
            self.background.lock().unwrap().push_back(callback);
        }
    }

    fn confirm(&self, head: BlockHash, confirmed: Callback) {
        if self.inline {
            confirmed();
        } else {
            self.confirms.lock().unwrap().push((head, confirmed));
        }
    }
}
