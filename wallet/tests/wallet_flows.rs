//! End-to-end wallet flows against the in-memory ledger and scheduler.

use std::sync::{Arc, Mutex};

use tessera_kv::{Env, Txn};
use tessera_wallet::{
    blake2b, ed25519,
    rng::TestRng,
    testing::{TestLedger, TestScheduler},
    Account, Block, BlockHash, Ledger, PrivateKey, SendBlock, Wallet,
    WalletError, WalletId, Wallets, WalletsConfig, WorkPool,
};

/// Easy mining threshold so tests never wait on the miner.
const EASY: u64 = 1 << 60;

struct Harness {
    env: Env,
    ledger: Arc<TestLedger>,
    scheduler: Arc<TestScheduler>,
    work: Arc<WorkPool>,
    wallets: Arc<Wallets>,
}

fn harness_in(env: Env, scheduler: TestScheduler) -> Harness {
    let ledger = Arc::new(TestLedger::new());
    let scheduler = Arc::new(scheduler);
    let work = Arc::new(WorkPool::with_threshold(Some(2), EASY));
    let ledger_dyn: Arc<dyn Ledger> = ledger.clone();
    let scheduler_dyn: Arc<dyn tessera_wallet::Scheduler> = scheduler.clone();
    let wallets = Wallets::new(
        env.clone(),
        ledger_dyn,
        scheduler_dyn,
        work.clone(),
        WalletsConfig::default(),
    )
    .unwrap();
    Harness {
        env,
        ledger,
        scheduler,
        work,
        wallets,
    }
}

fn harness() -> Harness {
    harness_in(Env::in_memory(), TestScheduler::immediate())
}

fn wallet_id(fill: u8) -> WalletId {
    WalletId::from_bytes([fill; 32])
}

fn new_wallet(h: &Harness, fill: u8) -> Arc<Wallet> {
    let mut rng = TestRng::from_u64(fill as u64);
    h.wallets.create(&mut rng, &wallet_id(fill)).unwrap()
}

#[test]
fn fresh_wallet_canonicalizes_to_empty_passphrase() {
    let h = harness();
    let wallet = new_wallet(&h, 1);

    // The immediate scheduler already ran the initial rekey.
    assert!(wallet.store.valid_password(&h.env.read()));

    wallet.store.enter_password(&h.env.read(), "x");
    assert!(!wallet.store.valid_password(&h.env.read()));

    wallet.store.enter_password(&h.env.read(), "");
    assert!(wallet.store.valid_password(&h.env.read()));
}

#[test]
fn insert_derives_a_stable_account_and_caches_work() {
    let h = harness();
    let wallet = new_wallet(&h, 1);

    let prv = PrivateKey::new([0x01; 32]);
    let account = wallet.insert(&prv).unwrap();
    assert_eq!(account, ed25519::public_key(&prv));
    assert!(wallet.exists(&account));

    let fetched = wallet.store.fetch(&h.env.read(), &account).unwrap();
    assert_eq!(fetched.expose(), prv.expose());

    // Insert pre-mines work over the account identifier (no chain yet).
    let cached = wallet.store.work_get(&h.env.read(), &account).unwrap();
    assert!(h.work.validate(&BlockHash::from(account), cached));
}

#[test]
fn work_pool_satisfies_the_threshold() {
    let h = harness();
    let root = BlockHash::from_bytes(blake2b::hash32(&[b"abc"]));
    let nonce = h.work.generate(&root);
    assert!(WorkPool::value(&root, nonce) < EASY);
    assert!(h.work.validate(&root, nonce));
}

#[test]
fn send_publishes_a_signed_block_once() {
    let h = harness();
    let wallet = new_wallet(&h, 1);

    let prv = PrivateKey::new([0x0a; 32]);
    let source = wallet.insert(&prv).unwrap();
    let head = BlockHash::from_bytes([0x99; 32]);
    h.ledger.set_account(source, head, 100);

    let destination = Account::from_bytes([0xbb; 32]);
    wallet.send_action(&source, &destination, 40).unwrap();

    let published = h.ledger.published();
    assert_eq!(published.len(), 1);
    let Block::Send(send) = &published[0] else {
        panic!("expected a send block");
    };
    assert_eq!(send.previous, head);
    assert_eq!(send.destination, destination);
    assert_eq!(send.balance, 60);
    assert!(send.verify(&source));
    assert!(h.work.validate(&head, send.work));

    // The fake ledger applied the block.
    assert_eq!(h.ledger.account_balance(&source), 60);
    assert!(h.ledger.pending_exists(&send.hash()));
}

#[test]
fn send_error_cases() {
    let h = harness();
    let wallet = new_wallet(&h, 1);
    let destination = Account::from_bytes([0xbb; 32]);

    let outside = Account::from_bytes([0xcc; 32]);
    assert!(matches!(
        wallet.send_action(&outside, &destination, 1),
        Err(WalletError::AccountNotInWallet)
    ));

    let source = wallet.insert(&PrivateKey::new([0x0a; 32])).unwrap();
    // No chain on the ledger yet.
    assert!(matches!(
        wallet.send_action(&source, &destination, 1),
        Err(WalletError::NoChain)
    ));

    h.ledger
        .set_account(source, BlockHash::from_bytes([0x99; 32]), 100);
    assert!(matches!(
        wallet.send_action(&source, &destination, 101),
        Err(WalletError::InsufficientBalance)
    ));

    wallet.store.enter_password(&h.env.read(), "wrong");
    assert!(matches!(
        wallet.send_action(&source, &destination, 1),
        Err(WalletError::InvalidPassword)
    ));
    assert_eq!(h.ledger.published_count(), 0);
}

#[test]
fn receive_opens_a_fresh_account_then_extends_it() {
    let h = harness();
    let wallet = new_wallet(&h, 1);

    let dest_prv = PrivateKey::new([0x0c; 32]);
    let destination = ed25519::public_key(&dest_prv);
    let representative = Account::from_bytes([0xee; 32]);

    let sender_prv = PrivateKey::new([0x0d; 32]);
    let sender = ed25519::public_key(&sender_prv);
    let send_one = SendBlock::new(
        BlockHash::from_bytes([0x55; 32]),
        destination,
        90,
        &sender_prv,
        0,
    );
    h.ledger.add_pending(send_one.clone(), sender, 10);

    // No chain at the destination: an open block, rooted at the account.
    wallet
        .receive_action(&send_one, &dest_prv, &representative)
        .unwrap();
    let published = h.ledger.published();
    let Block::Open(open) = &published[0] else {
        panic!("expected an open block");
    };
    assert_eq!(open.source, send_one.hash());
    assert_eq!(open.account, destination);
    assert_eq!(open.representative, representative);
    assert!(open.verify());
    assert!(h.work.validate(&BlockHash::from(destination), open.work));

    assert!(!h.ledger.pending_exists(&send_one.hash()));
    assert_eq!(h.ledger.account_balance(&destination), 10);

    // Receiving the same send again is refused.
    assert!(matches!(
        wallet.receive_action(&send_one, &dest_prv, &representative),
        Err(WalletError::NotPending)
    ));

    // A second send now extends the existing chain with a receive block.
    let send_two = SendBlock::new(
        BlockHash::from_bytes([0x56; 32]),
        destination,
        80,
        &sender_prv,
        0,
    );
    h.ledger.add_pending(send_two.clone(), sender, 5);
    wallet
        .receive_action(&send_two, &dest_prv, &representative)
        .unwrap();
    let published = h.ledger.published();
    let Block::Receive(receive) = published.last().unwrap() else {
        panic!("expected a receive block");
    };
    assert_eq!(receive.previous, open.hash());
    assert_eq!(receive.source, send_two.hash());
    assert!(receive.verify(&destination));
    assert_eq!(h.ledger.account_balance(&destination), 15);
}

#[test]
fn change_rotates_the_representative() {
    let h = harness();
    let wallet = new_wallet(&h, 1);

    let prv = PrivateKey::new([0x0a; 32]);
    let source = wallet.insert(&prv).unwrap();

    // Chainless accounts cannot change representatives.
    let representative = Account::from_bytes([0xee; 32]);
    assert!(matches!(
        wallet.change_action(&source, &representative),
        Err(WalletError::NoChain)
    ));

    let head = BlockHash::from_bytes([0x99; 32]);
    h.ledger.set_account(source, head, 100);
    wallet.change_action(&source, &representative).unwrap();

    let published = h.ledger.published();
    let Block::Change(change) = &published[0] else {
        panic!("expected a change block");
    };
    assert_eq!(change.previous, head);
    assert_eq!(change.representative, representative);
    assert!(change.verify(&source));
    assert_eq!(
        h.ledger.account_info(&source).unwrap().representative,
        representative
    );
}

#[test]
fn sync_wrappers_return_the_action_result() {
    let h = harness();
    let wallet = new_wallet(&h, 1);

    let prv = PrivateKey::new([0x0a; 32]);
    let source = wallet.insert(&prv).unwrap();
    let head = BlockHash::from_bytes([0x99; 32]);
    h.ledger.set_account(source, head, 100);

    let destination = Account::from_bytes([0xbb; 32]);
    wallet.send_sync(source, destination, 40).unwrap();
    assert_eq!(h.ledger.account_balance(&source), 60);

    // Errors propagate back to the blocking caller.
    assert!(matches!(
        wallet.send_sync(source, destination, 1000),
        Err(WalletError::InsufficientBalance)
    ));
}

#[test]
fn queued_actions_run_highest_amount_first() {
    let h = harness();
    let order = Arc::new(Mutex::new(Vec::new()));
    let account = Account::from_bytes([0x33; 32]);

    // Make the account busy, then queue two actions with amounts 10 and
    // 1000; the 1000 must run first once the runner drains the queue.
    let (hold_tx, hold_rx) = std::sync::mpsc::channel::<()>();
    let runner = {
        let wallets = h.wallets.clone();
        std::thread::spawn(move || {
            wallets.queue_wallet_action(
                account,
                1,
                Box::new(move || hold_rx.recv().unwrap()),
            );
        })
    };
    while !h.wallets.actions().running(&account) {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    for amount in [10u128, 1000] {
        let order = order.clone();
        h.wallets.queue_wallet_action(
            account,
            amount,
            Box::new(move || order.lock().unwrap().push(amount)),
        );
    }
    hold_tx.send(()).unwrap();
    runner.join().unwrap();

    assert_eq!(*order.lock().unwrap(), vec![1000, 10]);
}

#[test]
fn rekey_preserves_every_entry() {
    let h = harness();
    let wallet = new_wallet(&h, 1);

    let keys: Vec<PrivateKey> =
        (1..=3u8).map(|b| PrivateKey::new([b; 32])).collect();
    let accounts: Vec<Account> =
        keys.iter().map(|prv| wallet.insert(prv).unwrap()).collect();

    {
        let mut txn = h.env.write();
        wallet.store.rekey(&mut txn, "hunter2").unwrap();
        txn.commit().unwrap();
    }
    wallet.store.enter_password(&h.env.read(), "hunter2");
    assert!(wallet.store.valid_password(&h.env.read()));

    let txn = h.env.read();
    for (prv, account) in keys.iter().zip(&accounts) {
        assert_eq!(
            wallet.store.fetch(&txn, account).unwrap().expose(),
            prv.expose()
        );
    }

    wallet.store.enter_password(&txn, "");
    assert!(!wallet.store.valid_password(&txn));
}

#[test]
fn serialize_import_round_trip() {
    let h = harness();
    let wallet = new_wallet(&h, 1);
    let other = new_wallet(&h, 2);

    let prv = PrivateKey::new([0x0a; 32]);
    let account = wallet.insert(&prv).unwrap();
    let json = wallet.serialize();

    // The export is a flat hex-to-hex object including the account entry.
    let parsed: std::collections::BTreeMap<String, String> =
        serde_json::from_str(&json).unwrap();
    assert!(parsed.contains_key(&account.to_string()));
    for (key, value) in &parsed {
        assert_eq!(key.len(), 64);
        assert_eq!(value.len(), 64);
    }

    let mut rng = TestRng::from_u64(99);
    other.import(&mut rng, &json, "").unwrap();
    assert!(other.exists(&account));

    // Identical signatures under identical inputs after the round trip.
    let fetched = other.store.fetch(&h.env.read(), &account).unwrap();
    assert_eq!(
        ed25519::sign(&fetched, b"msg").as_bytes(),
        ed25519::sign(&prv, b"msg").as_bytes()
    );

    // A wrong passphrase imports nothing.
    let err = other.import(&mut rng, &json, "wrong");
    assert!(matches!(err, Err(WalletError::InvalidPassword)));
}

#[test]
fn wallets_reopen_from_the_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wallets.kv");

    let account = {
        let h = harness_in(
            Env::open(&path).unwrap(),
            TestScheduler::immediate(),
        );
        let wallet = new_wallet(&h, 1);
        wallet.insert(&PrivateKey::new([0x0a; 32])).unwrap()
    };

    let h = harness_in(Env::open(&path).unwrap(), TestScheduler::immediate());
    let wallet = h.wallets.open(&wallet_id(1)).expect("wallet persisted");
    assert!(wallet.exists(&account));
    // Reopened wallets unlock under the canonical empty passphrase.
    assert!(wallet.store.valid_password(&h.env.read()));
}

#[test]
fn destroy_removes_the_wallet() {
    let h = harness();
    let wallet = new_wallet(&h, 1);
    let id = *wallet.id();

    h.wallets.destroy(&id).unwrap();
    assert!(h.wallets.open(&id).is_none());
    assert!(!h.env.read().tree_exists(&id.to_string()));
    assert!(matches!(
        h.wallets.destroy(&id),
        Err(WalletError::UnknownWallet)
    ));
}

#[test]
fn search_pending_receives_confirmed_sends() {
    let h = harness_in(Env::in_memory(), TestScheduler::manual());
    let wallet = new_wallet(&h, 1);
    // Drain the initial-password task so the counts below are exact.
    h.scheduler.run_background();

    let dest_prv = PrivateKey::new([0x0c; 32]);
    let destination = ed25519::public_key(&dest_prv);
    {
        let mut txn = h.env.write();
        wallet.store.insert(&mut txn, &dest_prv).unwrap();
        txn.commit().unwrap();
    }

    let sender_prv = PrivateKey::new([0x0d; 32]);
    let sender = ed25519::public_key(&sender_prv);
    let sender_head = BlockHash::from_bytes([0x55; 32]);
    h.ledger.set_account(sender, sender_head, 90);
    let send =
        SendBlock::new(sender_head, destination, 90, &sender_prv, 0);
    h.ledger.add_pending(send.clone(), sender, 10);

    h.wallets.search_pending(wallet.id()).unwrap();

    // Scan runs in the background, then the confirmation fires, then the
    // queued receive runs.
    assert_eq!(h.scheduler.run_background(), 1);
    assert_eq!(h.scheduler.run_confirms(), 1);
    assert!(h.scheduler.run_background() >= 1);

    assert!(!h.ledger.pending_exists(&send.hash()));
    assert_eq!(h.ledger.account_balance(&destination), 10);
    assert_eq!(h.ledger.published_count(), 1);
}

#[test]
fn search_pending_refuses_locked_wallets() {
    let h = harness();
    let wallet = new_wallet(&h, 1);
    wallet.store.enter_password(&h.env.read(), "wrong");
    assert!(matches!(
        h.wallets.search_pending(wallet.id()),
        Err(WalletError::InvalidPassword)
    ));
}

#[test]
fn foreach_representative_yields_weighted_unlocked_keys() {
    let h = harness();
    let wallet = new_wallet(&h, 1);

    let weighted_prv = PrivateKey::new([0x0a; 32]);
    let weighted = wallet.insert(&weighted_prv).unwrap();
    let unweighted = wallet.insert(&PrivateKey::new([0x0b; 32])).unwrap();
    h.ledger.set_weight(weighted, 1_000);

    let mut seen = Vec::new();
    h.wallets.foreach_representative(|account, prv| {
        seen.push((*account, *prv.expose()));
    });
    assert_eq!(seen, vec![(weighted, *weighted_prv.expose())]);
    let _ = unweighted;

    // Locked wallets are skipped entirely.
    wallet.store.enter_password(&h.env.read(), "wrong");
    let mut seen = Vec::new();
    h.wallets.foreach_representative(|account, _| seen.push(*account));
    assert!(seen.is_empty());
}

#[test]
fn work_cache_goes_stale_when_the_head_moves() {
    let h = harness();
    let wallet = new_wallet(&h, 1);

    let prv = PrivateKey::new([0x0a; 32]);
    let source = wallet.insert(&prv).unwrap();
    let head = BlockHash::from_bytes([0x99; 32]);
    h.ledger.set_account(source, head, 100);

    // The cached nonce was mined over the account identifier and is now
    // stale; the send must still carry work valid over the real head.
    let destination = Account::from_bytes([0xbb; 32]);
    wallet.send_action(&source, &destination, 1).unwrap();
    let Block::Send(send) = &h.ledger.published()[0] else {
        panic!("expected a send block");
    };
    assert!(h.work.validate(&head, send.work));

    // After publication the cache holds work for the new head.
    let cached = wallet.store.work_get(&h.env.read(), &source).unwrap();
    assert!(h.work.validate(&send.hash(), cached));
}
