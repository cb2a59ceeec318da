//! Ledger state transitions.
//!
//! Four block kinds, each a signed transition on a single account chain:
//! `send` debits an account toward a destination, `receive` credits a
//! pending send into an existing chain, `open` creates a chain by
//! receiving into a fresh account, and `change` rotates the account's
//! voting representative.
//!
//! A block's hash is BLAKE2b-256 over its hashable fields in declared
//! order; amounts hash big-endian. The signature covers the hash. The
//! work nonce is mined over the block's *root*: the previous hash, or the
//! account itself for an open block.

use crate::{
    blake2b, ed25519,
    types::{Account, BlockHash, PrivateKey, Signature},
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SendBlock {
    pub previous: BlockHash,
    pub destination: Account,
    /// The source account's balance *after* this send.
    pub balance: u128,
    pub signature: Signature,
    pub work: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReceiveBlock {
    pub previous: BlockHash,
    /// Hash of the send block being received.
    pub source: BlockHash,
    pub signature: Signature,
    pub work: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpenBlock {
    /// Hash of the send block being received.
    pub source: BlockHash,
    pub representative: Account,
    pub account: Account,
    pub signature: Signature,
    pub work: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangeBlock {
    pub previous: BlockHash,
    pub representative: Account,
    pub signature: Signature,
    pub work: u64,
}

impl SendBlock {
    pub fn new(
        previous: BlockHash,
        destination: Account,
        balance: u128,
        prv: &PrivateKey,
        work: u64,
    ) -> Self {
        let mut block = Self {
            previous,
            destination,
            balance,
            signature: Signature::from_bytes([0u8; 64]),
            work,
        };
        block.signature = ed25519::sign(prv, block.hash().as_bytes());
        block
    }

    pub fn hash(&self) -> BlockHash {
        BlockHash::from_bytes(blake2b::hash32(&[
            self.previous.as_bytes(),
            self.destination.as_bytes(),
            &self.balance.to_be_bytes(),
        ]))
    }

    pub fn root(&self) -> BlockHash {
        self.previous
    }

    pub fn verify(&self, signer: &Account) -> bool {
        ed25519::verify(signer, self.hash().as_bytes(), &self.signature)
    }
}

impl ReceiveBlock {
    pub fn new(
        previous: BlockHash,
        source: BlockHash,
        prv: &PrivateKey,
        work: u64,
    ) -> Self {
        let mut block = Self {
            previous,
            source,
            signature: Signature::from_bytes([0u8; 64]),
            work,
        };
        block.signature = ed25519::sign(prv, block.hash().as_bytes());
        block
    }

    pub fn hash(&self) -> BlockHash {
        BlockHash::from_bytes(blake2b::hash32(&[
            self.previous.as_bytes(),
            self.source.as_bytes(),
        ]))
    }

    pub fn root(&self) -> BlockHash {
        self.previous
    }

    pub fn verify(&self, signer: &Account) -> bool {
        ed25519::verify(signer, self.hash().as_bytes(), &self.signature)
    }
}

impl OpenBlock {
    pub fn new(
        source: BlockHash,
        representative: Account,
        account: Account,
        prv: &PrivateKey,
        work: u64,
    ) -> Self {
        let mut block = Self {
            source,
            representative,
            account,
            signature: Signature::from_bytes([0u8; 64]),
            work,
        };
        block.signature = ed25519::sign(prv, block.hash().as_bytes());
        block
    }

    pub fn hash(&self) -> BlockHash {
        BlockHash::from_bytes(blake2b::hash32(&[
            self.source.as_bytes(),
            self.representative.as_bytes(),
            self.account.as_bytes(),
        ]))
    }

    /// An open block starts a chain, so its work root is the account.
    pub fn root(&self) -> BlockHash {
        BlockHash::from(self.account)
    }

    pub fn verify(&self) -> bool {
        ed25519::verify(&self.account, self.hash().as_bytes(), &self.signature)
    }
}

impl ChangeBlock {
    pub fn new(
        previous: BlockHash,
        representative: Account,
        prv: &PrivateKey,
        work: u64,
    ) -> Self {
        let mut block = Self {
            previous,
            representative,
            signature: Signature::from_bytes([0u8; 64]),
            work,
        };
        block.signature = ed25519::sign(prv, block.hash().as_bytes());
        block
    }

    pub fn hash(&self) -> BlockHash {
        BlockHash::from_bytes(blake2b::hash32(&[
            self.previous.as_bytes(),
            self.representative.as_bytes(),
        ]))
    }

    pub fn root(&self) -> BlockHash {
        self.previous
    }

    pub fn verify(&self, signer: &Account) -> bool {
        ed25519::verify(signer, self.hash().as_bytes(), &self.signature)
    }
}

/// Any of the four block kinds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Block {
    Send(SendBlock),
    Receive(ReceiveBlock),
    Open(OpenBlock),
    Change(ChangeBlock),
}

impl Block {
    pub fn hash(&self) -> BlockHash {
        match self {
            Self::Send(b) => b.hash(),
            Self::Receive(b) => b.hash(),
            Self::Open(b) => b.hash(),
            Self::Change(b) => b.hash(),
        }
    }

    pub fn root(&self) -> BlockHash {
        match self {
            Self::Send(b) => b.root(),
            Self::Receive(b) => b.root(),
            Self::Open(b) => b.root(),
            Self::Change(b) => b.root(),
        }
    }

    pub fn work(&self) -> u64 {
        match self {
            Self::Send(b) => b.work,
            Self::Receive(b) => b.work,
            Self::Open(b) => b.work,
            Self::Change(b) => b.work,
        }
    }
}
