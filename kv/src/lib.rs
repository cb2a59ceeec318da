//! Transactional ordered key-value environment.
//!
//! One [`Env`] holds any number of named trees (ordered maps from byte keys
//! to byte values). Transactions follow the single-writer / multi-reader
//! model the wallet assumes of its storage engine:
//!
//! * [`Env::read`] hands out a [`ReadTxn`]: a consistent snapshot of every
//!   tree. Readers never block writers or each other; a snapshot stays valid
//!   for as long as the caller holds it.
//! * [`Env::write`] hands out a [`WriteTxn`]: writers serialize on an
//!   internal mutex and mutate a private working copy. Nothing becomes
//!   visible to readers until [`WriteTxn::commit`]; dropping the transaction
//!   without committing discards every buffered change.
//!
//! A file-backed environment serializes itself to JSON on every commit and
//! replaces the on-disk file atomically: the new contents are fully written
//! to a sibling `<file>.write` path first and then renamed over the old
//! file, so a crash mid-commit can never leave a torn database behind.

use std::{
    collections::BTreeMap,
    fs, io,
    ops::Bound,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, RwLock},
};

use thiserror::Error;
use tracing::debug;

/// Every tree in the environment, keyed by tree name.
type Trees = BTreeMap<String, Tree>;
/// One ordered map of byte keys to byte values.
type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("kv io error: {0}")]
    Io(#[from] io::Error),
    #[error("kv database is corrupt: {0}")]
    Corrupt(String),
    #[error("kv tree does not exist: {0}")]
    TreeNotFound(String),
}

/// A shared handle to one key-value environment. Cheap to clone.
#[derive(Clone)]
pub struct Env {
    shared: Arc<EnvShared>,
}

struct EnvShared {
    /// `None` for a purely in-memory environment.
    path: Option<PathBuf>,
    /// The committed state. Readers clone the `Arc`; writers replace it.
    trees: RwLock<Arc<Trees>>,
    /// Serializes writers. Held for the lifetime of a [`WriteTxn`].
    writer: Mutex<()>,
}

impl Env {
    /// Open a file-backed environment, loading `path` if it exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let trees = match fs::read(&path) {
            Ok(bytes) => decode_trees(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Trees::new(),
            Err(err) => return Err(Error::Io(err)),
        };
        debug!(path = %path.display(), trees = trees.len(), "opened kv environment");
        Ok(Self {
            shared: Arc::new(EnvShared {
                path: Some(path),
                trees: RwLock::new(Arc::new(trees)),
                writer: Mutex::new(()),
            }),
        })
    }

    /// Open an environment that lives only in memory. Commits update the
    /// shared state but nothing is ever persisted.
    pub fn in_memory() -> Self {
        Self {
            shared: Arc::new(EnvShared {
                path: None,
                trees: RwLock::new(Arc::new(Trees::new())),
                writer: Mutex::new(()),
            }),
        }
    }

    /// Begin a read transaction: a consistent snapshot of the whole
    /// environment. Never blocks on writers.
    pub fn read(&self) -> ReadTxn {
        let snapshot = self.shared.trees.read().unwrap().clone();
        ReadTxn { snapshot }
    }

    /// Begin a write transaction. Blocks until any in-flight writer commits
    /// or aborts.
    pub fn write(&self) -> WriteTxn<'_> {
        let guard = self.shared.writer.lock().unwrap();
        let working = (**self.shared.trees.read().unwrap()).clone();
        WriteTxn {
            shared: &*self.shared,
            _guard: guard,
            working,
        }
    }
}

/// Read access shared by [`ReadTxn`] and [`WriteTxn`], so callers can take
/// "some transaction" when they only need to look at data.
pub trait Txn {
    fn tree_exists(&self, tree: &str) -> bool;

    fn tree_names(&self) -> Vec<String>;

    fn get(&self, tree: &str, key: &[u8]) -> Option<&[u8]>;

    /// Ordered iteration over `tree`, starting at the first key `>= start`.
    /// An unknown tree iterates as empty.
    fn iter_from<'a>(
        &'a self,
        tree: &str,
        start: &[u8],
    ) -> Box<dyn Iterator<Item = (&'a [u8], &'a [u8])> + 'a>;
}

fn tree_get<'a>(trees: &'a Trees, tree: &str, key: &[u8]) -> Option<&'a [u8]> {
    trees.get(tree)?.get(key).map(Vec::as_slice)
}

fn tree_iter_from<'a>(
    trees: &'a Trees,
    tree: &str,
    start: &[u8],
) -> Box<dyn Iterator<Item = (&'a [u8], &'a [u8])> + 'a> {
    match trees.get(tree) {
        Some(tree) => Box::new(
            tree.range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
                .map(|(k, v)| (k.as_slice(), v.as_slice())),
        ),
        None => Box::new(std::iter::empty()),
    }
}

/// A consistent read snapshot. Holds no locks.
pub struct ReadTxn {
    snapshot: Arc<Trees>,
}

impl Txn for ReadTxn {
    fn tree_exists(&self, tree: &str) -> bool {
        self.snapshot.contains_key(tree)
    }

    fn tree_names(&self) -> Vec<String> {
        self.snapshot.keys().cloned().collect()
    }

    fn get(&self, tree: &str, key: &[u8]) -> Option<&[u8]> {
        tree_get(&self.snapshot, tree, key)
    }

    fn iter_from<'a>(
        &'a self,
        tree: &str,
        start: &[u8],
    ) -> Box<dyn Iterator<Item = (&'a [u8], &'a [u8])> + 'a> {
        tree_iter_from(&self.snapshot, tree, start)
    }
}

/// An exclusive write transaction over a private working copy.
pub struct WriteTxn<'env> {
    shared: &'env EnvShared,
    _guard: MutexGuard<'env, ()>,
    working: Trees,
}

impl WriteTxn<'_> {
    /// Open a tree, creating it when `create` is set.
    pub fn open_tree(&mut self, tree: &str, create: bool) -> Result<(), Error> {
        if self.working.contains_key(tree) {
            return Ok(());
        }
        if !create {
            return Err(Error::TreeNotFound(tree.to_owned()));
        }
        self.working.insert(tree.to_owned(), Tree::new());
        Ok(())
    }

    pub fn put(
        &mut self,
        tree: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), Error> {
        let tree = self
            .working
            .get_mut(tree)
            .ok_or_else(|| Error::TreeNotFound(tree.to_owned()))?;
        tree.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    /// Delete a key. Returns whether the key was present.
    pub fn delete(&mut self, tree: &str, key: &[u8]) -> Result<bool, Error> {
        let tree = self
            .working
            .get_mut(tree)
            .ok_or_else(|| Error::TreeNotFound(tree.to_owned()))?;
        Ok(tree.remove(key).is_some())
    }

    /// Drop a whole tree and everything in it. Returns whether it existed.
    pub fn drop_tree(&mut self, tree: &str) -> bool {
        self.working.remove(tree).is_some()
    }

    /// Publish the working copy: persist it (file-backed environments) and
    /// swap it in for readers. Consumes the transaction.
    pub fn commit(self) -> Result<(), Error> {
        if let Some(path) = &self.shared.path {
            write_atomic(path, &encode_trees(&self.working))?;
        }
        *self.shared.trees.write().unwrap() = Arc::new(self.working);
        Ok(())
    }
}

impl Txn for WriteTxn<'_> {
    fn tree_exists(&self, tree: &str) -> bool {
        self.working.contains_key(tree)
    }

    fn tree_names(&self) -> Vec<String> {
        self.working.keys().cloned().collect()
    }

    fn get(&self, tree: &str, key: &[u8]) -> Option<&[u8]> {
        tree_get(&self.working, tree, key)
    }

    fn iter_from<'a>(
        &'a self,
        tree: &str,
        start: &[u8],
    ) -> Box<dyn Iterator<Item = (&'a [u8], &'a [u8])> + 'a> {
        tree_iter_from(&self.working, tree, start)
    }
}

/// On-disk format: a JSON object of trees, each mapping hex keys to hex
/// values. Keys sort identically in hex and in raw bytes, so the file is
/// stable across rewrites.
fn encode_trees(trees: &Trees) -> Vec<u8> {
    let encoded: BTreeMap<&str, BTreeMap<String, String>> = trees
        .iter()
        .map(|(name, tree)| {
            let entries = tree
                .iter()
                .map(|(k, v)| (hex::encode(k), hex::encode(v)))
                .collect();
            (name.as_str(), entries)
        })
        .collect();
    let mut bytes = serde_json::to_vec_pretty(&encoded)
        .expect("string maps always serialize");
    bytes.push(b'\n');
    bytes
}

fn decode_trees(bytes: &[u8]) -> Result<Trees, Error> {
    let decoded: BTreeMap<String, BTreeMap<String, String>> =
        serde_json::from_slice(bytes)
            .map_err(|err| Error::Corrupt(err.to_string()))?;
    let mut trees = Trees::new();
    for (name, entries) in decoded {
        let mut tree = Tree::new();
        for (k, v) in entries {
            let key = hex::decode(&k)
                .map_err(|_| Error::Corrupt(format!("bad hex key: {k}")))?;
            let value = hex::decode(&v)
                .map_err(|_| Error::Corrupt(format!("bad hex value: {v}")))?;
            tree.insert(key, value);
        }
        trees.insert(name, tree);
    }
    Ok(trees)
}

/// Fully write `bytes` to a sibling staging path, then rename over `path`.
/// The staging file lives in the same directory so the rename never crosses
/// a filesystem boundary.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".write");
    let staging = PathBuf::from(staging);
    fs::write(&staging, bytes)?;
    fs::rename(&staging, path)
}
