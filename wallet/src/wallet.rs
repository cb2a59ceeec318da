//! One wallet: an encrypted key store plus the ledger and work pool it
//! needs to turn user intent into signed, work-attached blocks.
//!
//! The three `_action` methods are the real state machines; they assume
//! they run under the per-account serializer so that at most one block is
//! being constructed per account at a time. Each one reads the chain head
//! and signs under a read snapshot, hands the finished block to the
//! ledger's process-and-republish ingress, and then proactively mines the
//! work for the *next* block on that chain, caching it under a write
//! transaction only if the chain has not moved on in the meantime.
//!
//! The `_sync` variants queue the action through the serializer and block
//! the caller until it completes.

use std::sync::{mpsc, Arc};
use std::time::Instant;

use tessera_kv::{Env, Txn, WriteTxn};
use tracing::{debug, info, warn};

use crate::{
    block::{Block, ChangeBlock, OpenBlock, ReceiveBlock, SendBlock},
    config::WalletsConfig,
    error::WalletError,
    ledger::Ledger,
    rng::Crng,
    store::WalletStore,
    types::{Account, BlockHash, PrivateKey, WalletId},
    wallets::ActionSerializer,
    work::WorkPool,
};

pub struct Wallet {
    pub store: WalletStore,
    env: Env,
    ledger: Arc<dyn Ledger>,
    work: Arc<WorkPool>,
    actions: Arc<ActionSerializer>,
    config: WalletsConfig,
}

impl Wallet {
    pub fn new(
        store: WalletStore,
        env: Env,
        ledger: Arc<dyn Ledger>,
        work: Arc<WorkPool>,
        actions: Arc<ActionSerializer>,
        config: WalletsConfig,
    ) -> Self {
        Self {
            store,
            env,
            ledger,
            work,
            actions,
            config,
        }
    }

    pub fn id(&self) -> &WalletId {
        self.store.id()
    }

    /// Canonicalize a freshly provisioned store: while the password slot
    /// still holds the zero sentinel and that sentinel unwraps the master
    /// key, rekey to the empty passphrase so the on-disk wrapping follows
    /// the normal derivation. Reopened wallets fall through to a plain
    /// empty-passphrase entry.
    pub fn enter_initial_password(&self) {
        if !self.store.password_is_zero() {
            return;
        }
        if self.store.valid_password(&self.env.read()) {
            // Newly created wallets have a zero key.
            let mut txn = self.env.write();
            match self.store.rekey(&mut txn, "") {
                Ok(()) => txn.commit().expect("failed to commit wallet rekey"),
                Err(err) => warn!(%err, "initial rekey failed"),
            }
        } else {
            self.store.enter_password(&self.env.read(), "");
        }
    }

    /// Add a private key to the store and pre-mine work for the account's
    /// first block.
    pub fn insert(&self, prv: &PrivateKey) -> Result<Account, WalletError> {
        let mut txn = self.env.write();
        let key = self.store.insert(&mut txn, prv)?;
        let root = self.ledger.latest_root(&key);
        txn.commit()?;
        self.work_generate(&key, &root);
        Ok(key)
    }

    pub fn exists(&self, account: &Account) -> bool {
        self.store.exists(&self.env.read(), account)
    }

    /// Import another wallet's JSON serialization, unlocked by
    /// `passphrase`. The entries are staged into a throwaway store so a
    /// bad passphrase or malformed JSON never touches this wallet.
    pub fn import<R: Crng>(
        &self,
        rng: &mut R,
        json: &str,
        passphrase: &str,
    ) -> Result<(), WalletError> {
        let mut txn = self.env.write();
        let staging_id = WalletId::random(rng);
        let staging = WalletStore::open_json(&mut txn, &staging_id, json)?;
        staging.enter_password(&txn, passphrase);
        let result = if staging.valid_password(&txn) {
            self.store.import_from(&mut txn, &staging)
        } else {
            Err(WalletError::InvalidPassword)
        };
        staging.destroy(&mut txn);
        // Commit regardless: entries imported before a failure stay, and
        // the staging tree must go away either way.
        txn.commit()?;
        result
    }

    pub fn serialize(&self) -> String {
        self.store.serialize_json(&self.env.read())
    }

    // --- block-producing actions --- //

    /// Construct, sign, and publish a send of `amount` from `source` to
    /// `destination`.
    pub fn send_action(
        &self,
        source: &Account,
        destination: &Account,
        amount: u128,
    ) -> Result<(), WalletError> {
        let block = {
            let txn = self.env.read();
            if !self.store.valid_password(&txn) {
                return Err(WalletError::InvalidPassword);
            }
            if !self.store.exists(&txn, source) {
                return Err(WalletError::AccountNotInWallet);
            }
            let info = self
                .ledger
                .account_info(source)
                .ok_or(WalletError::NoChain)?;
            let balance = self.ledger.account_balance(source);
            if balance == 0 || balance < amount {
                return Err(WalletError::InsufficientBalance);
            }
            let prv = self.store.fetch(&txn, source)?;
            let work = self.work_fetch(&txn, source, &info.head);
            SendBlock::new(info.head, *destination, balance - amount, &prv, work)
        };
        let hash = block.hash();
        self.ledger.process_receive_republish(
            Block::Send(block),
            self.config.creation_rebroadcast,
        );
        self.work_generate(source, &hash);
        Ok(())
    }

    /// Receive a pending send into its destination account: a receive
    /// block when the destination already has a chain, an open block
    /// otherwise. The destination's key is supplied by the caller, so
    /// this works even while the wallet is locked.
    pub fn receive_action(
        &self,
        send: &SendBlock,
        prv: &PrivateKey,
        representative: &Account,
    ) -> Result<(), WalletError> {
        let send_hash = send.hash();
        let destination = send.destination;
        let block = {
            let txn = self.env.read();
            if !self.ledger.pending_exists(&send_hash) {
                // The ledger no longer has this marked available to
                // receive.
                return Err(WalletError::NotPending);
            }
            match self.ledger.account_info(&destination) {
                Some(info) => {
                    let work = self.work_fetch(&txn, &destination, &info.head);
                    Block::Receive(ReceiveBlock::new(
                        info.head, send_hash, prv, work,
                    ))
                }
                None => {
                    let root = BlockHash::from(destination);
                    let work = self.work_fetch(&txn, &destination, &root);
                    Block::Open(OpenBlock::new(
                        send_hash,
                        *representative,
                        destination,
                        prv,
                        work,
                    ))
                }
            }
        };
        let hash = block.hash();
        self.ledger
            .process_receive_republish(block, self.config.creation_rebroadcast);
        self.work_generate(&destination, &hash);
        Ok(())
    }

    /// Rotate `source`'s voting representative.
    pub fn change_action(
        &self,
        source: &Account,
        representative: &Account,
    ) -> Result<(), WalletError> {
        let block = {
            let txn = self.env.read();
            if !self.store.valid_password(&txn) {
                return Err(WalletError::InvalidPassword);
            }
            if !self.store.exists(&txn, source) {
                return Err(WalletError::AccountNotInWallet);
            }
            let info = self
                .ledger
                .account_info(source)
                .ok_or(WalletError::NoChain)?;
            let prv = self.store.fetch(&txn, source)?;
            let work = self.work_fetch(&txn, source, &info.head);
            ChangeBlock::new(info.head, *representative, &prv, work)
        };
        let hash = block.hash();
        self.ledger.process_receive_republish(
            Block::Change(block),
            self.config.creation_rebroadcast,
        );
        self.work_generate(source, &hash);
        Ok(())
    }

    // --- blocking wrappers --- //

    /// Queue a send at maximum priority and wait for it to run.
    pub fn send_sync(
        self: &Arc<Self>,
        source: Account,
        destination: Account,
        amount: u128,
    ) -> Result<(), WalletError> {
        let (tx, rx) = mpsc::channel();
        let wallet = Arc::clone(self);
        self.actions.queue(
            source,
            u128::MAX,
            Box::new(move || {
                let _ = tx.send(wallet.send_action(&source, &destination, amount));
            }),
        );
        rx.recv().expect("wallet action dropped its result")
    }

    /// Queue a receive keyed by the send's amount and wait for it to run.
    pub fn receive_sync(
        self: &Arc<Self>,
        send: SendBlock,
        prv: PrivateKey,
        representative: Account,
        amount: u128,
    ) -> Result<(), WalletError> {
        let (tx, rx) = mpsc::channel();
        let wallet = Arc::clone(self);
        self.actions.queue(
            send.destination,
            amount,
            Box::new(move || {
                let _ = tx.send(wallet.receive_action(&send, &prv, &representative));
            }),
        );
        rx.recv().expect("wallet action dropped its result")
    }

    /// Queue a representative change at maximum priority and wait for it
    /// to run.
    pub fn change_sync(
        self: &Arc<Self>,
        source: Account,
        representative: Account,
    ) -> Result<(), WalletError> {
        let (tx, rx) = mpsc::channel();
        let wallet = Arc::clone(self);
        self.actions.queue(
            source,
            u128::MAX,
            Box::new(move || {
                let _ = tx.send(wallet.change_action(&source, &representative));
            }),
        );
        rx.recv().expect("wallet action dropped its result")
    }

    // --- proof-of-work plumbing --- //

    /// Work for `root`: the cached nonce when it still validates, a fresh
    /// mining run otherwise.
    pub(crate) fn work_fetch(
        &self,
        txn: &impl Txn,
        account: &Account,
        root: &BlockHash,
    ) -> u64 {
        match self.store.work_get(txn, account) {
            Ok(work) if self.work.validate(root, work) => work,
            Ok(_) => {
                debug!(%account, "cached work invalid, regenerating");
                self.generate_timed(root)
            }
            Err(_) => self.generate_timed(root),
        }
    }

    /// Mine work for `root` and cache it, so the account's next block
    /// publishes without waiting on the miner.
    pub(crate) fn work_generate(&self, account: &Account, root: &BlockHash) {
        let work = self.generate_timed(root);
        let mut txn = self.env.write();
        self.work_update(&mut txn, account, root, work);
        txn.commit().expect("failed to commit work cache");
    }

    /// Cache `work` for `account`, but only while the ledger still roots
    /// the account at `root`; a block published in the meantime would make
    /// the nonce stale before it was ever used.
    fn work_update(
        &self,
        txn: &mut WriteTxn<'_>,
        account: &Account,
        root: &BlockHash,
        work: u64,
    ) {
        debug_assert!(self.work.validate(root, work));
        if self.ledger.latest_root(account) == *root {
            match self.store.work_put(txn, account, work) {
                Ok(()) => info!(%account, "successfully cached work"),
                Err(err) => warn!(%account, %err, "failed to cache work"),
            }
        } else {
            info!(%account, "cached work no longer valid, discarding");
        }
    }

    fn generate_timed(&self, root: &BlockHash) -> u64 {
        if !self.config.log_work_generation_time {
            return self.work.generate(root);
        }
        debug!(%root, "beginning work generation");
        let started = Instant::now();
        let work = self.work.generate(root);
        debug!(
            elapsed_us = started.elapsed().as_micros() as u64,
            "work generation complete"
        );
        work
    }
}
