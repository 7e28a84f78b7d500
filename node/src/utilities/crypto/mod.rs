//! Signing capability used by the consensus core.
//!
//! The core never touches private keys directly. It asks a [`Signer`] to sign a hash and to
//! verify a signature made by another producer.

use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utilities::encoding::{from_base58, to_base58, to_hex};
use crate::utilities::hash::HashType;

pub(crate) mod ed25519;

#[derive(Error, Debug)]
pub enum KeyPairError {
    #[error("Invalid key length")]
    SliceLength,
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Invalid public key: '{0}'")]
    PublicKey(String),
    #[error("Invalid private key")]
    PrivateKey,
}

/// Producer public key, base58 encoded.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct PublicKey(String);

impl PublicKey {
    pub fn new<S: Into<String>>(encoded: S) -> Self {
        Self(encoded.into())
    }

    pub fn from_raw(raw: &[u8]) -> Self {
        Self(to_base58(raw))
    }

    pub fn to_raw(&self) -> Result<Vec<u8>, KeyPairError> {
        from_base58(&self.0).map_err(|_| KeyPairError::PublicKey(self.0.clone()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PublicKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", to_hex(&self.0))
    }
}

/// Keystore capability: `sign(hash) -> signature` and `verify(pubkey, hash, signature) -> bool`.
///
/// Implementations must be safe to share between groups.
pub trait Signer: Send + Sync {
    fn public_key(&self) -> PublicKey;

    fn sign(&self, hash: &HashType) -> Result<Signature, KeyPairError>;

    fn verify(&self, public_key: &PublicKey, hash: &HashType, signature: &Signature) -> bool;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn public_key_raw_round_trip() {
        let raw = [7u8; 32];
        let key = PublicKey::from_raw(&raw);
        assert_eq!(key.to_raw().unwrap(), raw.to_vec());
    }

    #[test]
    fn public_key_ordering_follows_encoding() {
        let a = PublicKey::new("A");
        let b = PublicKey::new("B");
        assert!(a < b);
    }

    #[test]
    fn invalid_public_key_encoding() {
        let key = PublicKey::new("not-base58-0OIl");
        assert!(key.to_raw().is_err());
    }
}
