//! The wallet registry and the per-account action serializer.
//!
//! The registry owns every open wallet; background work (the pending
//! search, initial password canonicalization) only ever captures a wallet
//! *identifier* plus a weak registry handle, re-looks the wallet up when
//! it runs, and exits quietly if the wallet is gone by then.
//!
//! The serializer is what makes per-account block construction safe
//! without holding database write locks across mining: an account's
//! actions run strictly one at a time, on whichever caller thread happened
//! to claim the account first. Later submissions for a busy account queue
//! up and drain highest-amount-first, so a large user-initiated send jumps
//! ahead of a backlog of small automated receives.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, Weak},
};

use tessera_kv::{Env, Txn};
use tracing::{debug, info, warn};

use crate::{
    config::WalletsConfig,
    error::WalletError,
    ledger::{Ledger, Scheduler},
    rng::Crng,
    store::WalletStore,
    types::{Account, PrivateKey, WalletId},
    wallet::Wallet,
    work::WorkPool,
};

/// A queued wallet action.
pub type Action = Box<dyn FnOnce() + Send>;

type Observer = Arc<dyn Fn(&Account, bool) + Send + Sync>;

/// Runs wallet actions one at a time per account.
///
/// Actions are invoked with no serializer lock held. They may call any
/// wallet method — including queueing further actions — but must not
/// assume anything about which thread runs them: the thread that finds an
/// account idle becomes that account's runner and stays the runner until
/// the account's queue drains.
pub struct ActionSerializer {
    state: Mutex<SerializerState>,
    observer: Mutex<Option<Observer>>,
}

#[derive(Default)]
struct SerializerState {
    /// Accounts with an action in flight.
    current: HashSet<Account>,
    /// Queued actions per busy account, highest amount first; equal
    /// amounts keep submission order via the sequence number.
    pending: HashMap<Account, BTreeMap<(Reverse<u128>, u64), Action>>,
    seq: u64,
}

impl ActionSerializer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SerializerState::default()),
            observer: Mutex::new(None),
        }
    }

    /// Register a callback observing `(account, busy)` transitions.
    pub fn set_observer(
        &self,
        observer: impl Fn(&Account, bool) + Send + Sync + 'static,
    ) {
        *self.observer.lock().unwrap() = Some(Arc::new(observer));
    }

    /// Whether an action for `account` is running right now.
    pub fn running(&self, account: &Account) -> bool {
        self.state.lock().unwrap().current.contains(account)
    }

    /// Run `action` for `account`, serialized against every other action
    /// for the same account. If the account is idle the calling thread
    /// runs the action (and any actions queued meanwhile) before
    /// returning; otherwise the action is queued at priority `amount` and
    /// this returns immediately.
    pub fn queue(&self, account: Account, amount: u128, action: Action) {
        let mut action = {
            let mut state = self.state.lock().unwrap();
            if state.current.insert(account) {
                action
            } else {
                let seq = state.seq;
                state.seq += 1;
                state
                    .pending
                    .entry(account)
                    .or_default()
                    .insert((Reverse(amount), seq), action);
                return;
            }
        };
        loop {
            self.notify(&account, true);
            action();
            self.notify(&account, false);
            let next = {
                let mut state = self.state.lock().unwrap();
                let next = state
                    .pending
                    .get_mut(&account)
                    .and_then(BTreeMap::pop_first)
                    .map(|(_, action)| action);
                if next.is_none() {
                    state.pending.remove(&account);
                    let removed = state.current.remove(&account);
                    debug_assert!(removed, "runner lost its claim");
                }
                next
            };
            match next {
                Some(next_action) => action = next_action,
                None => return,
            }
        }
    }

    fn notify(&self, account: &Account, busy: bool) {
        let observer = self.observer.lock().unwrap().clone();
        if let Some(observer) = observer {
            observer(account, busy);
        }
    }
}

impl Default for ActionSerializer {
    fn default() -> Self {
        Self::new()
    }
}

/// Tree holding one record per known wallet identifier.
const REGISTRY_TREE: &str = "wallets";

/// The collection of this node's wallets.
pub struct Wallets {
    env: Env,
    ledger: Arc<dyn Ledger>,
    scheduler: Arc<dyn Scheduler>,
    work: Arc<WorkPool>,
    config: WalletsConfig,
    actions: Arc<ActionSerializer>,
    items: Mutex<HashMap<WalletId, Arc<Wallet>>>,
}

impl Wallets {
    /// Open the registry, reopening every wallet recorded in the
    /// environment. Wallets that fail to open are skipped with a warning;
    /// each reopened wallet gets its initial-password canonicalization
    /// scheduled on the background scheduler.
    pub fn new(
        env: Env,
        ledger: Arc<dyn Ledger>,
        scheduler: Arc<dyn Scheduler>,
        work: Arc<WorkPool>,
        config: WalletsConfig,
    ) -> Result<Arc<Self>, WalletError> {
        let actions = Arc::new(ActionSerializer::new());
        let mut items = HashMap::new();
        {
            let mut txn = env.write();
            txn.open_tree(REGISTRY_TREE, true)?;
            let ids: Vec<WalletId> = txn
                .iter_from(REGISTRY_TREE, &[])
                .map(|(key, _)| {
                    WalletId::try_from_slice(key)
                        .expect("registry keys are 32 bytes")
                })
                .collect();
            for id in ids {
                match WalletStore::open(&txn, &id) {
                    Ok(store) => {
                        let wallet = Wallet::new(
                            store,
                            env.clone(),
                            Arc::clone(&ledger),
                            Arc::clone(&work),
                            Arc::clone(&actions),
                            config.clone(),
                        );
                        items.insert(id, Arc::new(wallet));
                    }
                    Err(err) => warn!(wallet = %id, %err, "could not open wallet"),
                }
            }
            txn.commit()?;
        }

        let wallets = Arc::new(Self {
            env,
            ledger,
            scheduler,
            work,
            config,
            actions,
            items: Mutex::new(items),
        });
        for id in wallets.ids() {
            wallets.schedule_initial_password(&id);
        }
        Ok(wallets)
    }

    /// Provision a brand-new wallet under `id`.
    pub fn create<R: Crng>(
        self: &Arc<Self>,
        rng: &mut R,
        id: &WalletId,
    ) -> Result<Arc<Wallet>, WalletError> {
        let mut items = self.items.lock().unwrap();
        if items.contains_key(id) {
            return Err(WalletError::StoreOpenFailed(format!(
                "wallet {id} already exists"
            )));
        }
        let mut txn = self.env.write();
        let store = WalletStore::create(
            rng,
            &mut txn,
            id,
            &self.config.default_representative,
        )?;
        txn.put(REGISTRY_TREE, id.as_bytes(), &[])?;
        txn.commit()?;

        let wallet = Arc::new(Wallet::new(
            store,
            self.env.clone(),
            Arc::clone(&self.ledger),
            Arc::clone(&self.work),
            Arc::clone(&self.actions),
            self.config.clone(),
        ));
        items.insert(*id, Arc::clone(&wallet));
        drop(items);
        self.schedule_initial_password(id);
        Ok(wallet)
    }

    pub fn open(&self, id: &WalletId) -> Option<Arc<Wallet>> {
        self.items.lock().unwrap().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<WalletId> {
        self.items.lock().unwrap().keys().copied().collect()
    }

    /// Remove a wallet and drop its store.
    pub fn destroy(&self, id: &WalletId) -> Result<(), WalletError> {
        let wallet = self
            .items
            .lock()
            .unwrap()
            .remove(id)
            .ok_or(WalletError::UnknownWallet)?;
        let mut txn = self.env.write();
        wallet.store.destroy(&mut txn);
        txn.delete(REGISTRY_TREE, id.as_bytes())?;
        txn.commit()?;
        Ok(())
    }

    pub fn actions(&self) -> &Arc<ActionSerializer> {
        &self.actions
    }

    /// Queue an action for `account` through the serializer.
    pub fn queue_wallet_action(
        &self,
        account: Account,
        amount: u128,
        action: Action,
    ) {
        self.actions.queue(account, amount, action);
    }

    /// Kick off an asynchronous scan for pending sends owed to any of the
    /// wallet's accounts. Refused while the wallet is locked.
    pub fn search_pending(
        self: &Arc<Self>,
        id: &WalletId,
    ) -> Result<(), WalletError> {
        let wallet = self.open(id).ok_or(WalletError::UnknownWallet)?;
        if !wallet.store.valid_password(&self.env.read()) {
            warn!(wallet = %id, "stopping search, wallet is locked");
            return Err(WalletError::InvalidPassword);
        }
        let weak = Arc::downgrade(self);
        let id = *id;
        self.scheduler.background(Box::new(move || {
            if let Some(wallets) = weak.upgrade() {
                wallets.run_search(&id);
            }
        }));
        Ok(())
    }

    /// The deferred scan body: walk the ledger's pending index and, for
    /// every entry owed to a held account, submit the sender's head for
    /// confirmation. Confirmation queues the actual receives.
    fn run_search(self: &Arc<Self>, id: &WalletId) {
        let Some(wallet) = self.open(id) else { return };
        info!(wallet = %id, "beginning pending block search");
        let mut keys: HashSet<Account> =
            wallet.store.accounts(&self.env.read()).into_iter().collect();
        for (_, pending) in self.ledger.pending() {
            // One confirmation per source account is enough; drop the key
            // so further pending entries to it are skipped.
            if keys.remove(&pending.destination) {
                let head = self.ledger.latest(&pending.source);
                info!(
                    source = %pending.source,
                    head = %head,
                    "found a pending block"
                );
                let weak = Arc::downgrade(self);
                let id = *id;
                let source = pending.source;
                self.scheduler.confirm(
                    head,
                    Box::new(move || {
                        if let Some(wallets) = weak.upgrade() {
                            wallets.receive_all(&id, &source);
                        }
                    }),
                );
            }
        }
        info!(wallet = %id, "pending block search phase complete");
    }

    /// A source account was confirmed: queue a receive for every pending
    /// block it sent to this wallet, each keyed by its amount.
    fn receive_all(self: &Arc<Self>, id: &WalletId, source: &Account) {
        let Some(wallet) = self.open(id) else { return };
        info!(account = %source, "account confirmed, receiving all blocks");
        let txn = self.env.read();
        let representative = wallet.store.representative(&txn);
        for (hash, pending) in self.ledger.pending() {
            if pending.source != *source
                || !wallet.store.exists(&txn, &pending.destination)
            {
                continue;
            }
            let prv = match wallet.store.fetch(&txn, &pending.destination) {
                Ok(prv) => prv,
                Err(err) => {
                    warn!(
                        account = %pending.destination,
                        %err,
                        "unable to fetch key, skipping pending block"
                    );
                    continue;
                }
            };
            let Some(send) = self.ledger.pending_block(&hash) else {
                continue;
            };
            let weak = Arc::downgrade(self);
            let id = *id;
            let destination = pending.destination;
            let amount = pending.amount;
            self.scheduler.background(Box::new(move || {
                let Some(wallets) = weak.upgrade() else { return };
                let Some(wallet) = wallets.open(&id) else { return };
                wallets.actions.queue(
                    destination,
                    amount,
                    Box::new(move || {
                        info!(block = %send.hash(), "receiving block");
                        if let Err(err) =
                            wallet.receive_action(&send, &prv, &representative)
                        {
                            warn!(
                                block = %send.hash(),
                                %err,
                                "error receiving block"
                            );
                        }
                    }),
                );
            }));
        }
    }

    /// Call `f` with the key pair of every held account that carries
    /// voting weight. Locked wallets are skipped.
    pub fn foreach_representative<F>(&self, mut f: F)
    where
        F: FnMut(&Account, &PrivateKey),
    {
        let items: Vec<Arc<Wallet>> =
            self.items.lock().unwrap().values().cloned().collect();
        for wallet in items {
            let txn = self.env.read();
            if !wallet.store.valid_password(&txn) {
                debug!(wallet = %wallet.id(), "skipping locked wallet");
                continue;
            }
            for account in wallet.store.accounts(&txn) {
                if self.ledger.weight(&account) == 0 {
                    continue;
                }
                match wallet.store.fetch(&txn, &account) {
                    Ok(prv) => f(&account, &prv),
                    Err(err) => {
                        warn!(%account, %err, "could not fetch voting key")
                    }
                }
            }
        }
    }

    fn schedule_initial_password(self: &Arc<Self>, id: &WalletId) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let id = *id;
        self.scheduler.background(Box::new(move || {
            let Some(wallets) = weak.upgrade() else { return };
            if let Some(wallet) = wallets.open(&id) {
                wallet.enter_initial_password();
            }
        }));
    }
}
