//! The encrypted key store.
//!
//! One store is one tree in the key-value environment, named by the hex
//! form of the wallet identifier. Identifiers 0–4 are reserved records
//! (version, salt, wrapped master key, check value, representative);
//! every identifier from 5 upward is an account entry holding that
//! account's private key encrypted under the wallet master key, plus a
//! cached proof-of-work nonce.
//!
//! The master key itself is persisted XOR-wrapped under the
//! passphrase-derived key, and the check value lets us test a passphrase
//! without ever comparing key material: the check is the wrap of the
//! all-zero block under the true master key, so re-deriving it with the
//! master key our current passphrase unwraps must reproduce the stored
//! value exactly.
//!
//! All operations take an ambient transaction; committing is the
//! caller's business. Reserved entries are written at creation and are
//! invariant afterwards, so a missing or short reserved record is
//! storage corruption and panics rather than returning an error.

use std::{collections::BTreeMap, io, path::Path, sync::Mutex};

use secrecy::{ExposeSecret, Secret, Zeroize};
use tessera_kv::{Txn, WriteTxn};

use crate::{
    ed25519,
    error::WalletError,
    kdf,
    rng::Crng,
    types::{Account, PrivateKey, WalletId},
};

/// On-disk store format version.
pub const VERSION_CURRENT: u32 = 1;

const VERSION_ID: u8 = 0;
const SALT_ID: u8 = 1;
const WALLET_KEY_ID: u8 = 2;
const CHECK_ID: u8 = 3;
const REPRESENTATIVE_ID: u8 = 4;
/// Identifiers below this are reserved; account entries start here.
pub const SPECIAL_COUNT: u8 = 5;

/// A reserved identifier as a 32-byte big-endian key.
const fn special(n: u8) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[31] = n;
    bytes
}

/// One stored record: 32 bytes of payload plus the cached work nonce,
/// laid out as `payload ‖ work_le`. Reserved records carry their field in
/// `key` with zero work.
struct Entry {
    key: [u8; 32],
    work: u64,
}

impl Entry {
    const LEN: usize = 40;

    fn reserved(key: [u8; 32]) -> Self {
        Self { key, work: 0 }
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[..32]);
        let mut work = [0u8; 8];
        work.copy_from_slice(&bytes[32..]);
        Some(Self {
            key,
            work: u64::from_le_bytes(work),
        })
    }

    fn encode(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[..32].copy_from_slice(&self.key);
        bytes[32..].copy_from_slice(&self.work.to_le_bytes());
        bytes
    }
}

pub struct WalletStore {
    id: WalletId,
    /// Tree name: `hex(id)`.
    tree: String,
    /// The passphrase-derived key slot. Mutated only inside short critical
    /// sections; readers re-lock per use.
    password: Mutex<Secret<[u8; 32]>>,
}

impl WalletStore {
    /// Provision a fresh store: version, random salt, random master key
    /// wrapped under the zero key, check value, and representative. The
    /// new store answers `valid_password` until a passphrase is entered,
    /// which is what lets the owning wallet canonicalize it to the empty
    /// passphrase on first open.
    pub fn create<R: Crng>(
        rng: &mut R,
        txn: &mut WriteTxn<'_>,
        id: &WalletId,
        representative: &Account,
    ) -> Result<Self, WalletError> {
        let tree = id.to_string();
        if txn.tree_exists(&tree) {
            return Err(WalletError::StoreOpenFailed(format!(
                "wallet {id} already exists"
            )));
        }
        txn.open_tree(&tree, true)?;
        let store = Self {
            id: *id,
            tree,
            password: Mutex::new(kdf::zero_key()),
        };

        let mut version = [0u8; 32];
        version[28..].copy_from_slice(&VERSION_CURRENT.to_be_bytes());
        store.entry_put(txn, &special(VERSION_ID), &Entry::reserved(version))?;

        let mut salt = [0u8; 32];
        rng.fill_bytes(&mut salt);
        store.entry_put(txn, &special(SALT_ID), &Entry::reserved(salt))?;

        // The master key is a fixed random key that encrypts every entry;
        // it is persisted wrapped under the user's passphrase-derived key,
        // which starts out as zero.
        let mut wallet_key = [0u8; 32];
        rng.fill_bytes(&mut wallet_key);
        let iv = wrap_iv(&salt);
        let wrapped =
            kdf::stream_xor(kdf::zero_key().expose_secret(), &iv, &wallet_key);
        store.entry_put(
            txn,
            &special(WALLET_KEY_ID),
            &Entry::reserved(wrapped),
        )?;

        let check = kdf::stream_xor(&wallet_key, &iv, &[0u8; 32]);
        wallet_key.zeroize();
        store.entry_put(txn, &special(CHECK_ID), &Entry::reserved(check))?;

        store.entry_put(
            txn,
            &special(REPRESENTATIVE_ID),
            &Entry::reserved(representative.to_bytes()),
        )?;
        Ok(store)
    }

    /// Open a persisted store. Fails unless the tree and every reserved
    /// record are present. The password slot starts at the empty
    /// passphrase's derivation, matching how wallets reopen on restart.
    pub fn open(txn: &impl Txn, id: &WalletId) -> Result<Self, WalletError> {
        let tree = id.to_string();
        if !txn.tree_exists(&tree) {
            return Err(WalletError::StoreOpenFailed(format!(
                "no such wallet: {id}"
            )));
        }
        for n in 0..SPECIAL_COUNT {
            let present = txn
                .get(&tree, &special(n))
                .and_then(Entry::decode)
                .is_some();
            if !present {
                return Err(WalletError::StoreOpenFailed(format!(
                    "wallet {id} is missing reserved entry {n}"
                )));
            }
        }
        let store = Self {
            id: *id,
            tree,
            password: Mutex::new(kdf::zero_key()),
        };
        store.enter_password(txn, "");
        Ok(store)
    }

    /// Import a store from its JSON serialization: a flat object mapping
    /// 64-character hex identifiers to 64-character hex values. The JSON
    /// is validated in full — shape, hex, and presence of every reserved
    /// identifier — before anything is written.
    pub fn open_json(
        txn: &mut WriteTxn<'_>,
        id: &WalletId,
        json: &str,
    ) -> Result<Self, WalletError> {
        let tree = id.to_string();
        if txn.tree_exists(&tree) {
            return Err(WalletError::StoreOpenFailed(format!(
                "wallet {id} already exists"
            )));
        }

        let map: BTreeMap<String, String> = serde_json::from_str(json)
            .map_err(|err| {
                WalletError::StoreOpenFailed(format!("bad wallet json: {err}"))
            })?;
        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in &map {
            let key = decode_hex32(key).ok_or_else(|| {
                WalletError::StoreOpenFailed(format!("bad identifier: {key}"))
            })?;
            let value = decode_hex32(value).ok_or_else(|| {
                WalletError::StoreOpenFailed(format!("bad value for {key:02x?}"))
            })?;
            entries.push((key, value));
        }
        for n in 0..SPECIAL_COUNT {
            if !entries.iter().any(|(key, _)| *key == special(n)) {
                return Err(WalletError::StoreOpenFailed(format!(
                    "wallet json is missing reserved entry {n}"
                )));
            }
        }

        txn.open_tree(&tree, true)?;
        let store = Self {
            id: *id,
            tree,
            password: Mutex::new(kdf::zero_key()),
        };
        for (key, value) in entries {
            // Cached work is not part of the wire format; imported entries
            // start with an empty cache.
            store.entry_put(txn, &key, &Entry { key: value, work: 0 })?;
        }
        Ok(store)
    }

    pub fn id(&self) -> &WalletId {
        &self.id
    }

    // --- password handling --- //

    /// Whether the passphrase-derived key currently in memory unwraps the
    /// master key: the re-derived check value must equal the stored one.
    pub fn valid_password(&self, txn: &impl Txn) -> bool {
        let salt = self.salt(txn);
        let wallet_key = self.wallet_key(txn);
        let check = kdf::stream_xor(
            wallet_key.expose_secret(),
            &wrap_iv(&salt),
            &[0u8; 32],
        );
        check == self.check(txn)
    }

    /// Derive and store the passphrase-derived key. Does not verify it;
    /// callers follow up with [`valid_password`](Self::valid_password).
    pub fn enter_password(&self, txn: &impl Txn, passphrase: &str) {
        let salt = self.salt(txn);
        let pdk = kdf::derive_pdk(passphrase, &salt);
        *self.password.lock().unwrap() = pdk;
    }

    /// Whether the slot still holds the all-zero sentinel a fresh store
    /// starts with.
    pub fn password_is_zero(&self) -> bool {
        self.password.lock().unwrap().expose_secret() == &[0u8; 32]
    }

    /// Re-wrap the master key under a new passphrase. The stored entries
    /// are untouched; only the wrapping of the master key changes.
    pub fn rekey(
        &self,
        txn: &mut WriteTxn<'_>,
        passphrase: &str,
    ) -> Result<(), WalletError> {
        if !self.valid_password(txn) {
            return Err(WalletError::InvalidPassword);
        }
        let salt = self.salt(txn);
        let wallet_key = self.wallet_key(txn);
        let pdk = kdf::derive_pdk(passphrase, &salt);
        let wrapped = kdf::stream_xor(
            pdk.expose_secret(),
            &wrap_iv(&salt),
            wallet_key.expose_secret(),
        );
        *self.password.lock().unwrap() = pdk;
        self.entry_put(txn, &special(WALLET_KEY_ID), &Entry::reserved(wrapped))
    }

    // --- key entries --- //

    /// Store a private key. Returns the derived public key, which is also
    /// the entry identifier.
    pub fn insert(
        &self,
        txn: &mut WriteTxn<'_>,
        prv: &PrivateKey,
    ) -> Result<Account, WalletError> {
        if !self.valid_password(txn) {
            return Err(WalletError::InvalidPassword);
        }
        let public = ed25519::public_key(prv);
        let salt = self.salt(txn);
        let wallet_key = self.wallet_key(txn);
        let encrypted = kdf::stream_xor(
            wallet_key.expose_secret(),
            &wrap_iv(&salt),
            prv.expose(),
        );
        self.entry_put(
            txn,
            public.as_bytes(),
            &Entry {
                key: encrypted,
                work: 0,
            },
        )?;
        Ok(public)
    }

    /// Decrypt an account's private key. Fails with [`CorruptEntry`] when
    /// the decrypted key does not re-derive the entry's identifier, which
    /// catches both storage corruption and a wrong master key.
    ///
    /// [`CorruptEntry`]: WalletError::CorruptEntry
    pub fn fetch(
        &self,
        txn: &impl Txn,
        account: &Account,
    ) -> Result<PrivateKey, WalletError> {
        let entry = self
            .entry_get(txn, account.as_bytes())
            .ok_or(WalletError::AccountNotInWallet)?;
        let salt = self.salt(txn);
        let wallet_key = self.wallet_key(txn);
        let mut decrypted = kdf::stream_xor(
            wallet_key.expose_secret(),
            &wrap_iv(&salt),
            &entry.key,
        );
        let prv = PrivateKey::new(decrypted);
        decrypted.zeroize();
        if ed25519::public_key(&prv) != *account {
            return Err(WalletError::CorruptEntry);
        }
        Ok(prv)
    }

    pub fn erase(
        &self,
        txn: &mut WriteTxn<'_>,
        account: &Account,
    ) -> Result<(), WalletError> {
        txn.delete(&self.tree, account.as_bytes())?;
        Ok(())
    }

    pub fn exists(&self, txn: &impl Txn, account: &Account) -> bool {
        self.entry_get(txn, account.as_bytes()).is_some()
    }

    /// Every account entry, in identifier order.
    pub fn accounts(&self, txn: &impl Txn) -> Vec<Account> {
        txn.iter_from(&self.tree, &special(SPECIAL_COUNT))
            .map(|(key, _)| {
                Account::try_from_slice(key)
                    .expect("wallet store corrupt: key is not 32 bytes")
            })
            .collect()
    }

    // --- work cache --- //

    /// The cached work nonce for an account. Zero means "never cached";
    /// non-zero values may still be stale and must be re-validated against
    /// the account's current root before use.
    pub fn work_get(
        &self,
        txn: &impl Txn,
        account: &Account,
    ) -> Result<u64, WalletError> {
        self.entry_get(txn, account.as_bytes())
            .map(|entry| entry.work)
            .ok_or(WalletError::AccountNotInWallet)
    }

    pub fn work_put(
        &self,
        txn: &mut WriteTxn<'_>,
        account: &Account,
        work: u64,
    ) -> Result<(), WalletError> {
        let mut entry = self
            .entry_get(txn, account.as_bytes())
            .ok_or(WalletError::AccountNotInWallet)?;
        entry.work = work;
        self.entry_put(txn, account.as_bytes(), &entry)
    }

    // --- reserved records --- //

    pub fn version(&self, txn: &impl Txn) -> u32 {
        let value = self.reserved(txn, VERSION_ID);
        u32::from_be_bytes(value[28..].try_into().expect("4 bytes"))
    }

    pub fn representative(&self, txn: &impl Txn) -> Account {
        Account::from_bytes(self.reserved(txn, REPRESENTATIVE_ID))
    }

    pub fn representative_set(
        &self,
        txn: &mut WriteTxn<'_>,
        representative: &Account,
    ) -> Result<(), WalletError> {
        self.entry_put(
            txn,
            &special(REPRESENTATIVE_ID),
            &Entry::reserved(representative.to_bytes()),
        )
    }

    /// Whether this wallet holds the key of its own representative.
    pub fn is_representative(&self, txn: &impl Txn) -> bool {
        self.exists(txn, &self.representative(txn))
    }

    // --- export --- //

    /// Serialize every entry — reserved and regular — as a flat JSON
    /// object of hex identifier to hex payload. Cached work is not
    /// exported.
    pub fn serialize_json(&self, txn: &impl Txn) -> String {
        let mut map = BTreeMap::new();
        for (key, value) in txn.iter_from(&self.tree, &[]) {
            let entry = Entry::decode(value)
                .expect("wallet store corrupt: bad entry length");
            map.insert(hex::encode(key), hex::encode(entry.key));
        }
        serde_json::to_string_pretty(&map).expect("string maps serialize")
    }

    /// Write the JSON serialization to `path`, fully writing a staging
    /// file and renaming it into place so the backup is never torn.
    pub fn write_backup(
        &self,
        txn: &impl Txn,
        path: &Path,
    ) -> io::Result<()> {
        let json = self.serialize_json(txn);
        let mut staging = path.as_os_str().to_owned();
        staging.push(".write");
        std::fs::write(&staging, json.as_bytes())?;
        std::fs::rename(&staging, path)
    }

    /// Move the given accounts out of `other` into this store. Stops at
    /// the first failure; accounts already moved stay moved.
    pub fn move_keys(
        &self,
        txn: &mut WriteTxn<'_>,
        other: &WalletStore,
        keys: &[Account],
    ) -> Result<(), WalletError> {
        if !self.valid_password(txn) || !other.valid_password(txn) {
            return Err(WalletError::InvalidPassword);
        }
        for key in keys {
            let prv = other
                .fetch(txn, key)
                .map_err(|_| WalletError::ImportFailed)?;
            self.insert(txn, &prv)?;
            other.erase(txn, key)?;
        }
        Ok(())
    }

    /// Move every account of `other` into this store.
    pub fn import_from(
        &self,
        txn: &mut WriteTxn<'_>,
        other: &WalletStore,
    ) -> Result<(), WalletError> {
        let keys = other.accounts(txn);
        self.move_keys(txn, other, &keys)
    }

    /// Drop the store's tree and everything in it.
    pub fn destroy(&self, txn: &mut WriteTxn<'_>) {
        txn.drop_tree(&self.tree);
    }

    // --- internals --- //

    fn entry_get(&self, txn: &impl Txn, id: &[u8; 32]) -> Option<Entry> {
        txn.get(&self.tree, id).and_then(Entry::decode)
    }

    fn entry_put(
        &self,
        txn: &mut WriteTxn<'_>,
        id: &[u8; 32],
        entry: &Entry,
    ) -> Result<(), WalletError> {
        txn.put(&self.tree, id, &entry.encode())?;
        Ok(())
    }

    fn reserved(&self, txn: &impl Txn, n: u8) -> [u8; 32] {
        self.entry_get(txn, &special(n))
            .expect("wallet store corrupt: missing reserved entry")
            .key
    }

    pub fn salt(&self, txn: &impl Txn) -> [u8; 32] {
        self.reserved(txn, SALT_ID)
    }

    fn check(&self, txn: &impl Txn) -> [u8; 32] {
        self.reserved(txn, CHECK_ID)
    }

    /// Unwrap the master key with the passphrase-derived key currently in
    /// the slot. Only correct when `valid_password` holds.
    fn wallet_key(&self, txn: &impl Txn) -> Secret<[u8; 32]> {
        let wrapped = self.reserved(txn, WALLET_KEY_ID);
        let salt = self.salt(txn);
        let password = self.password.lock().unwrap();
        let mut unwrapped = kdf::stream_xor(
            password.expose_secret(),
            &wrap_iv(&salt),
            &wrapped,
        );
        let secret = Secret::new(unwrapped);
        unwrapped.zeroize();
        secret
    }
}

fn wrap_iv(salt: &[u8; 32]) -> [u8; kdf::IV_LEN] {
    salt[..kdf::IV_LEN].try_into().expect("salt is 32 bytes")
}

fn decode_hex32(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 {
        return None;
    }
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(s, &mut bytes).ok().map(|()| bytes)
}

#[cfg(test)]
mod test {
    use proptest::{
        arbitrary::any, collection, prop_assert, prop_assert_eq, proptest,
        strategy::Strategy, test_runner::Config,
    };
    use tessera_kv::Env;

    use super::*;
    use crate::rng::TestRng;

    fn wallet_id(fill: u8) -> WalletId {
        WalletId::from_bytes([fill; 32])
    }

    fn representative() -> Account {
        Account::from_bytes([0xee; 32])
    }

    fn create(env: &Env, fill: u8) -> WalletStore {
        let mut rng = TestRng::from_u64(fill as u64);
        let mut txn = env.write();
        let store = WalletStore::create(
            &mut rng,
            &mut txn,
            &wallet_id(fill),
            &representative(),
        )
        .unwrap();
        txn.commit().unwrap();
        store
    }

    #[test]
    fn fresh_store_unlocks_with_zero_key_then_empty_passphrase() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        let txn = env.read();

        // Fresh store: the zero sentinel unwraps the master key.
        assert!(store.valid_password(&txn));

        // A wrong passphrase locks it, the empty passphrase unlocks it
        // again once the store has been rekeyed to it.
        let mut txn = env.write();
        store.rekey(&mut txn, "").unwrap();
        assert!(store.valid_password(&txn));
        store.enter_password(&txn, "x");
        assert!(!store.valid_password(&txn));
        store.enter_password(&txn, "");
        assert!(store.valid_password(&txn));
        txn.commit().unwrap();
    }

    #[test]
    fn create_writes_all_reserved_entries() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        let txn = env.read();
        assert_eq!(store.version(&txn), VERSION_CURRENT);
        assert_eq!(store.representative(&txn), representative());
        assert!(!store.salt(&txn).iter().all(|&b| b == 0));
        assert!(store.accounts(&txn).is_empty());
    }

    #[test]
    fn representative_can_be_rotated() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        let mut txn = env.write();

        // The creation-time representative's key is not held here.
        assert_eq!(store.representative(&txn), representative());
        assert!(!store.is_representative(&txn));

        // Rotate to an account whose key the store holds.
        let held = store.insert(&mut txn, &PrivateKey::new([0x21; 32])).unwrap();
        store.representative_set(&mut txn, &held).unwrap();
        assert_eq!(store.representative(&txn), held);
        assert!(store.is_representative(&txn));

        // Rotating to an unheld account flips it back.
        let unheld = Account::from_bytes([0x44; 32]);
        store.representative_set(&mut txn, &unheld).unwrap();
        assert_eq!(store.representative(&txn), unheld);
        assert!(!store.is_representative(&txn));
    }

    #[test]
    fn insert_fetch_round_trip() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        let mut txn = env.write();

        let prv = PrivateKey::new([0x01; 32]);
        let public = store.insert(&mut txn, &prv).unwrap();
        assert_eq!(public, ed25519::public_key(&prv));
        assert!(store.exists(&txn, &public));

        let fetched = store.fetch(&txn, &public).unwrap();
        assert_eq!(fetched.expose(), prv.expose());

        // The ciphertext at rest is not the plaintext key.
        let raw = txn.get(&store.tree, public.as_bytes()).unwrap();
        assert_ne!(&raw[..32], prv.expose().as_slice());
    }

    #[test]
    fn insert_requires_valid_password() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        let mut txn = env.write();
        store.enter_password(&txn, "wrong");
        let err = store.insert(&mut txn, &PrivateKey::new([0x01; 32]));
        assert!(matches!(err, Err(WalletError::InvalidPassword)));
    }

    #[test]
    fn fetch_detects_corruption() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        let mut txn = env.write();
        let public =
            store.insert(&mut txn, &PrivateKey::new([0x01; 32])).unwrap();

        // Flip a ciphertext bit.
        let mut raw = txn.get(&store.tree, public.as_bytes()).unwrap().to_vec();
        raw[0] ^= 1;
        txn.put(&store.tree, public.as_bytes(), &raw).unwrap();

        assert!(matches!(
            store.fetch(&txn, &public),
            Err(WalletError::CorruptEntry)
        ));
    }

    #[test]
    fn erase_removes_the_entry() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        let mut txn = env.write();
        let public =
            store.insert(&mut txn, &PrivateKey::new([0x01; 32])).unwrap();
        store.erase(&mut txn, &public).unwrap();
        assert!(!store.exists(&txn, &public));
        assert!(matches!(
            store.fetch(&txn, &public),
            Err(WalletError::AccountNotInWallet)
        ));
    }

    #[test]
    fn rekey_preserves_entries() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        let mut txn = env.write();

        let keys: Vec<PrivateKey> =
            (1..=3u8).map(|b| PrivateKey::new([b; 32])).collect();
        let publics: Vec<Account> = keys
            .iter()
            .map(|prv| store.insert(&mut txn, prv).unwrap())
            .collect();

        store.rekey(&mut txn, "hunter2").unwrap();
        store.enter_password(&txn, "hunter2");
        assert!(store.valid_password(&txn));

        for (prv, public) in keys.iter().zip(&publics) {
            assert_eq!(
                store.fetch(&txn, public).unwrap().expose(),
                prv.expose()
            );
        }

        // The old (zero-key) state no longer unlocks.
        store.enter_password(&txn, "");
        assert!(!store.valid_password(&txn));
        store.enter_password(&txn, "hunter2");
        txn.commit().unwrap();
    }

    #[test]
    fn rekey_with_wrong_password_fails() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        let mut txn = env.write();
        store.enter_password(&txn, "wrong");
        assert!(matches!(
            store.rekey(&mut txn, "new"),
            Err(WalletError::InvalidPassword)
        ));
    }

    #[test]
    fn work_cache_round_trip() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        let mut txn = env.write();
        let public =
            store.insert(&mut txn, &PrivateKey::new([0x01; 32])).unwrap();

        assert_eq!(store.work_get(&txn, &public).unwrap(), 0);
        store.work_put(&mut txn, &public, 0xdead_beef).unwrap();
        assert_eq!(store.work_get(&txn, &public).unwrap(), 0xdead_beef);

        let absent = Account::from_bytes([0x77; 32]);
        assert!(matches!(
            store.work_get(&txn, &absent),
            Err(WalletError::AccountNotInWallet)
        ));
    }

    #[test]
    fn accounts_skip_reserved_entries() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        let mut txn = env.write();
        let mut publics: Vec<Account> = (1..=4u8)
            .map(|b| store.insert(&mut txn, &PrivateKey::new([b; 32])).unwrap())
            .collect();
        publics.sort();
        assert_eq!(store.accounts(&txn), publics);
    }

    #[test]
    fn serialize_then_open_json_round_trips() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        let mut txn = env.write();
        let prv = PrivateKey::new([0x09; 32]);
        let public = store.insert(&mut txn, &prv).unwrap();
        store.work_put(&mut txn, &public, 42).unwrap();
        let json = store.serialize_json(&txn);

        let copy =
            WalletStore::open_json(&mut txn, &wallet_id(2), &json).unwrap();
        assert_eq!(copy.accounts(&txn), vec![public]);
        // The same zero-key state unwraps the imported master key.
        assert!(copy.valid_password(&txn));
        assert_eq!(copy.fetch(&txn, &public).unwrap().expose(), prv.expose());
        // Cached work is not part of the wire format.
        assert_eq!(copy.work_get(&txn, &public).unwrap(), 0);
    }

    #[test]
    fn open_json_missing_reserved_writes_nothing() {
        let env = Env::in_memory();
        let mut txn = env.write();
        // Only a version entry; salt/key/check/representative missing.
        let json = format!(
            "{{\"{}\": \"{}\"}}",
            hex::encode(special(VERSION_ID)),
            hex::encode([0u8; 32]),
        );
        assert!(matches!(
            WalletStore::open_json(&mut txn, &wallet_id(3), &json),
            Err(WalletError::StoreOpenFailed(_))
        ));
        assert!(!txn.tree_exists(&wallet_id(3).to_string()));
    }

    #[test]
    fn open_validates_reserved_entries() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        assert!(WalletStore::open(&env.read(), &wallet_id(1)).is_ok());
        assert!(matches!(
            WalletStore::open(&env.read(), &wallet_id(9)),
            Err(WalletError::StoreOpenFailed(_))
        ));

        let mut txn = env.write();
        txn.delete(&store.tree, &special(CHECK_ID)).unwrap();
        txn.commit().unwrap();
        assert!(matches!(
            WalletStore::open(&env.read(), &wallet_id(1)),
            Err(WalletError::StoreOpenFailed(_))
        ));
    }

    #[test]
    fn move_keys_between_stores() {
        let env = Env::in_memory();
        let a = create(&env, 1);
        let b = create(&env, 2);
        let mut txn = env.write();

        let prv = PrivateKey::new([0x05; 32]);
        let public = b.insert(&mut txn, &prv).unwrap();
        a.move_keys(&mut txn, &b, &[public]).unwrap();

        assert!(a.exists(&txn, &public));
        assert!(!b.exists(&txn, &public));
        assert_eq!(a.fetch(&txn, &public).unwrap().expose(), prv.expose());
    }

    #[test]
    fn import_keeps_partial_progress_on_failure() {
        let env = Env::in_memory();
        let a = create(&env, 1);
        let b = create(&env, 2);
        let mut txn = env.write();

        let p1 = b.insert(&mut txn, &PrivateKey::new([0x05; 32])).unwrap();
        let p2 = b.insert(&mut txn, &PrivateKey::new([0x06; 32])).unwrap();
        let (first, second) = if p1 < p2 { (p1, p2) } else { (p2, p1) };

        // Corrupt the second entry so the import fails midway.
        let mut raw = txn.get(&b.tree, second.as_bytes()).unwrap().to_vec();
        raw[0] ^= 1;
        txn.put(&b.tree, second.as_bytes(), &raw).unwrap();

        assert!(matches!(
            a.import_from(&mut txn, &b),
            Err(WalletError::ImportFailed)
        ));
        // The first account moved before the failure and stays moved.
        assert!(a.exists(&txn, &first));
        assert!(!b.exists(&txn, &first));
        assert!(b.exists(&txn, &second));
    }

    #[test]
    fn destroy_drops_the_tree() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        let mut txn = env.write();
        store.destroy(&mut txn);
        txn.commit().unwrap();
        assert!(!env.read().tree_exists(&wallet_id(1).to_string()));
    }

    #[test]
    fn write_backup_writes_the_serialization() {
        let env = Env::in_memory();
        let store = create(&env, 1);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet-backup.json");
        let txn = env.read();
        store.write_backup(&txn, &path).unwrap();
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk, store.serialize_json(&txn));
    }

    proptest! {
        #[test]
        fn json_round_trip_preserves_accounts(
            seeds in collection::btree_set(any::<[u8; 32]>(), 1..5),
        ) {
            let env = Env::in_memory();
            let store = create(&env, 1);
            let mut txn = env.write();
            let mut accounts = Vec::new();
            for seed in &seeds {
                accounts.push(
                    store.insert(&mut txn, &PrivateKey::new(*seed)).unwrap(),
                );
            }
            accounts.sort();

            let json = store.serialize_json(&txn);
            let copy =
                WalletStore::open_json(&mut txn, &wallet_id(7), &json).unwrap();
            prop_assert_eq!(copy.accounts(&txn), accounts.clone());
            for account in &accounts {
                let copy_key = copy.fetch(&txn, account).unwrap();
                let store_key = store.fetch(&txn, account).unwrap();
                prop_assert_eq!(copy_key.expose(), store_key.expose());
            }
        }
    }

    proptest! {
        // Key stretching is expensive, keep the case count down.
        #![proptest_config(Config::with_cases(4))]
        #[test]
        fn rekey_round_trip_any_passphrase(
            passphrase in collection::vec(any::<char>(), 0..8)
                .prop_map(String::from_iter),
        ) {
            let env = Env::in_memory();
            let store = create(&env, 1);
            let mut txn = env.write();
            let prv = PrivateKey::new([0x31; 32]);
            let public = store.insert(&mut txn, &prv).unwrap();

            store.rekey(&mut txn, &passphrase).unwrap();
            store.enter_password(&txn, &passphrase);
            prop_assert!(store.valid_password(&txn));
            let fetched = store.fetch(&txn, &public).unwrap();
            prop_assert_eq!(fetched.expose(), prv.expose());
        }
    }
}
