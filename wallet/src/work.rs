//! The proof-of-work pool.
//!
//! Every published block carries a 64-bit nonce whose BLAKE2b-64 digest,
//! taken over `nonce ‖ root`, falls below the publication threshold. The
//! pool mines those nonces on one OS thread per hardware thread.
//!
//! All bookkeeping (the pending queue, the single in-flight root, the
//! results map) lives under one mutex; hashing itself runs lock-free.
//! Workers snapshot a monotonic ticket before they start iterating and
//! abandon the inner loop as soon as the ticket moves, which is how they
//! learn that another worker already solved the root. Exactly one worker
//! publishes per root: the one whose solution still matches the in-flight
//! root under the lock.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex,
    },
    thread,
};

use tracing::{debug, trace};

use crate::{blake2b, types::BlockHash};

/// The network-wide publication threshold. A nonce is valid for a root iff
/// its work digest is below this value. Must match peers bit-for-bit.
pub const PUBLISH_THRESHOLD: u64 = 1 << 38;

/// Candidate nonces checked between ticket inspections.
const BATCH: u32 = 256;

pub struct WorkPool {
    shared: Arc<Shared>,
    threads: Vec<thread::JoinHandle<()>>,
}

struct Shared {
    state: Mutex<State>,
    /// Bumped once per published root. Read by miners outside the lock.
    ticket: AtomicU64,
    threshold: u64,
    /// Wakes workers when a root is queued or shutdown begins.
    producer: Condvar,
    /// Wakes `generate` callers when a result lands.
    consumer: Condvar,
}

struct State {
    /// The root currently being mined, shared by every idle worker.
    current: Option<BlockHash>,
    pending: VecDeque<BlockHash>,
    completed: HashMap<BlockHash, u64>,
    done: bool,
}

impl WorkPool {
    /// Start a pool mining against [`PUBLISH_THRESHOLD`] with one worker
    /// per hardware thread (minimum one), or `threads` workers if given.
    pub fn new(threads: Option<usize>) -> Self {
        Self::with_threshold(threads, PUBLISH_THRESHOLD)
    }

    /// Start a pool with an explicit threshold. Tests inject an easy
    /// threshold here so mining terminates in microseconds.
    pub fn with_threshold(threads: Option<usize>, threshold: u64) -> Self {
        let count = threads.unwrap_or_else(|| {
            thread::available_parallelism().map_or(1, usize::from)
        });
        let count = count.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                current: None,
                pending: VecDeque::new(),
                completed: HashMap::new(),
                done: false,
            }),
            ticket: AtomicU64::new(0),
            threshold,
            producer: Condvar::new(),
            consumer: Condvar::new(),
        });
        let threads = (0..count as u64)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("work-{index}"))
                    .spawn(move || run_worker(&shared, index))
                    .expect("failed to spawn work thread")
            })
            .collect();
        debug!(threads = count, "work pool started");
        Self { shared, threads }
    }

    /// The work digest: BLAKE2b-64 of `nonce ‖ root`, little-endian.
    pub fn value(root: &BlockHash, nonce: u64) -> u64 {
        blake2b::hash8(&[&nonce.to_le_bytes(), root.as_bytes()])
    }

    /// Whether `nonce` satisfies this pool's threshold for `root`.
    pub fn validate(&self, root: &BlockHash, nonce: u64) -> bool {
        Self::value(root, nonce) < self.shared.threshold
    }

    /// Mine a nonce for `root`. Blocks the calling thread until one of the
    /// workers publishes a result.
    ///
    /// Must not be called after [`stop`](Self::stop): a stopped pool will
    /// never service the request.
    pub fn generate(&self, root: &BlockHash) -> u64 {
        debug_assert!(!root.is_zero());
        let mut state = self.shared.state.lock().unwrap();
        debug_assert!(!state.done, "generate called on a stopped pool");
        state.pending.push_back(*root);
        self.shared.producer.notify_one();
        loop {
            if let Some(nonce) = state.completed.remove(root) {
                return nonce;
            }
            state = self.shared.consumer.wait(state).unwrap();
        }
    }

    /// Signal shutdown. Roots already queued are still mined; the worker
    /// threads exit once the queue drains.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.done = true;
        self.shared.producer.notify_all();
    }
}

impl Drop for WorkPool {
    fn drop(&mut self) {
        self.stop();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_worker(shared: &Shared, index: u64) {
    let mut rng = Xorshift1024Star::new(index);
    let mut state = shared.state.lock().unwrap();
    // Keep draining until shutdown, including any root already admitted.
    while !state.done || !state.pending.is_empty() || state.current.is_some() {
        if let Some(root) = state.current {
            let ticket = shared.ticket.load(Ordering::Acquire);
            drop(state);
            let solution = mine(shared, &mut rng, &root, ticket);
            state = shared.state.lock().unwrap();
            if let Some(nonce) = solution {
                if state.current == Some(root) {
                    // We won the race for this root; retire it.
                    shared.ticket.fetch_add(1, Ordering::AcqRel);
                    state.completed.insert(root, nonce);
                    shared.consumer.notify_all();
                    state.current = None;
                    trace!(worker = index, %root, nonce, "work published");
                }
            }
        } else if let Some(next) = state.pending.pop_front() {
            state.current = Some(next);
            shared.producer.notify_all();
        } else {
            state = shared.producer.wait(state).unwrap();
        }
    }
}

/// Iterate candidates in batches, re-checking the ticket between batches.
/// Returns `None` if the ticket moved (someone else finished the root).
fn mine(
    shared: &Shared,
    rng: &mut Xorshift1024Star,
    root: &BlockHash,
    ticket: u64,
) -> Option<u64> {
    loop {
        for _ in 0..BATCH {
            let nonce = rng.next();
            if WorkPool::value(root, nonce) < shared.threshold {
                return Some(nonce);
            }
        }
        if shared.ticket.load(Ordering::Acquire) != ticket {
            return None;
        }
    }
}

/// xorshift1024*. Deliberately seeded from a per-thread constant: the
/// nonce stream only has to cover the 64-bit space evenly, not be
/// unpredictable, and constant seeding keeps worker startup allocation-
/// and syscall-free. The state must simply be non-zero.
struct Xorshift1024Star {
    s: [u64; 16],
    p: usize,
}

impl Xorshift1024Star {
    fn new(thread: u64) -> Self {
        Self {
            s: [0x0123_4567_89ab_cdefu64.wrapping_add(thread); 16],
            p: 0,
        }
    }

    fn next(&mut self) -> u64 {
        let p0 = self.p;
        let p1 = (p0 + 1) & 15;
        self.p = p1;
        let s0 = self.s[p0];
        let mut s1 = self.s[p1];
        s1 ^= s1 << 31;
        s1 ^= s1 >> 11;
        let s0 = s0 ^ (s0 >> 30);
        self.s[p1] = s0 ^ s1;
        self.s[p1].wrapping_mul(1_181_783_497_276_652_981)
    }
}
