//! Random number generation.

pub use rand_core::{CryptoRng, RngCore};
use ring::rand::SecureRandom;

/// A succinct trait alias for a cryptographically secure PRNG.
pub trait Crng: RngCore + CryptoRng {}

impl<R: RngCore + CryptoRng> Crng for R {}

/// The operating system's CSPRNG, driven through [`ring`].
///
/// Salt, master-key, and private-key generation cannot proceed without
/// entropy, so a failure of the OS generator is fatal rather than a
/// recoverable error; `try_fill_bytes` never reports one.
#[derive(Clone, Debug)]
pub struct OsRng(ring::rand::SystemRandom);

impl OsRng {
    pub fn new() -> Self {
        Self(ring::rand::SystemRandom::new())
    }
}

impl Default for OsRng {
    fn default() -> Self {
        Self::new()
    }
}

/// [`ring::rand::SystemRandom`] is a cryptographically secure PRG.
impl CryptoRng for OsRng {}

impl RngCore for OsRng {
    fn next_u32(&mut self) -> u32 {
        let mut word = [0u8; 4];
        self.fill_bytes(&mut word);
        u32::from_le_bytes(word)
    }

    fn next_u64(&mut self) -> u64 {
        let mut word = [0u8; 8];
        self.fill_bytes(&mut word);
        u64::from_le_bytes(word)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill(dest).expect("OS entropy source failed");
    }

    fn try_fill_bytes(
        &mut self,
        dest: &mut [u8],
    ) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// A tiny deterministic rng (splitmix64) for tests that need repeatable
/// keys and salts. Not cryptographically secure.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug)]
pub struct TestRng(u64);

#[cfg(any(test, feature = "test-utils"))]
impl TestRng {
    pub fn from_u64(seed: u64) -> Self {
        Self(seed)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl CryptoRng for TestRng {}

#[cfg(any(test, feature = "test-utils"))]
impl RngCore for TestRng {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }

    fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand_core::impls::fill_bytes_via_next(self, dest);
    }

    fn try_fill_bytes(
        &mut self,
        dest: &mut [u8],
    ) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
