//! Fixed-width value types: accounts, block hashes, wallet identifiers,
//! signatures, and the secret-wrapped private key.

use std::{fmt, str::FromStr};

use rand_core::{CryptoRng, RngCore};
use secrecy::{ExposeSecret, Secret};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid hex value: expected {expected} lowercase hex characters")]
pub struct DecodeHexError {
    expected: usize,
}

/// Implements the shared surface of a 256-bit value: raw byte accessors,
/// zero checks, and lowercase-hex `Display`/`FromStr`/`Debug`.
macro_rules! impl_u256 {
    ($name:ident) => {
        impl $name {
            pub const LEN: usize = 32;
            pub const ZERO: Self = Self([0u8; 32]);

            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_bytes(self) -> [u8; 32] {
                self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }

            pub fn try_from_slice(slice: &[u8]) -> Option<Self> {
                <[u8; 32]>::try_from(slice).ok().map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self)
            }
        }

        impl FromStr for $name {
            type Err = DecodeHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let err = DecodeHexError { expected: 64 };
                if s.len() != 64 {
                    return Err(err);
                }
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes).map_err(|_| err)?;
                Ok(Self(bytes))
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(
                &self,
                serializer: S,
            ) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// An Ed25519 public key, which doubles as the account address.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Account([u8; 32]);
impl_u256!(Account);

/// The BLAKE2b-256 hash of a block; also used as a proof-of-work root.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockHash([u8; 32]);
impl_u256!(BlockHash);

/// The opaque 256-bit identifier of one wallet. Its hex form names the
/// wallet's tree in the key-value environment.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct WalletId([u8; 32]);
impl_u256!(WalletId);

impl WalletId {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl From<Account> for BlockHash {
    /// An account with no chain uses its own identifier as its work root.
    fn from(account: Account) -> Self {
        Self(account.to_bytes())
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Signature([u8; 64]);

impl Signature {
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

/// A 32-byte Ed25519 private key. Zeroized on drop; `Debug` never prints
/// the key material.
pub struct PrivateKey(Secret<[u8; 32]>);

impl PrivateKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(Secret::new(bytes))
    }

    pub fn from_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(Secret::new(bytes))
    }

    pub fn expose(&self) -> &[u8; 32] {
        self.0.expose_secret()
    }
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self::new(*self.expose())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let account = Account::from_bytes([0xab; 32]);
        let hex = account.to_string();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex, "ab".repeat(32));
        assert_eq!(Account::from_str(&hex).unwrap(), account);
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(Account::from_str("ab").is_err());
        assert!(Account::from_str(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn secrets_do_not_format() {
        let prv = PrivateKey::new([0x7f; 32]);
        assert_eq!(format!("{prv:?}"), "PrivateKey(..)");
    }
}
