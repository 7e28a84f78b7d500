use std::fmt::{Debug, Display};

use digest::consts::U32;
use digest::Digest;
use serde::{Deserialize, Serialize};

type Blake2b256 = blake2::Blake2b<U32>;

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct HashType([u8; 32]);

impl HashType {
    pub fn new(inner: [u8; 32]) -> Self {
        Self(inner)
    }

    pub fn inner(&self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for HashType {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for HashType {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for HashType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", array_bytes::bytes2hex("", self.0))
    }
}

impl Debug for HashType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// Incremental blake2b-256 hasher.
#[derive(Default)]
pub struct Hasher {
    inner: Blake2b256,
}

impl Hasher {
    pub fn update<D: AsRef<[u8]>>(&mut self, data: D) -> &mut Self {
        Digest::update(&mut self.inner, data.as_ref());
        self
    }

    pub fn finish(self) -> HashType {
        let mut dest = [0; 32];
        dest.copy_from_slice(self.inner.finalize().as_slice());
        HashType(dest)
    }

    pub fn digest(data: &[u8]) -> HashType {
        HashType(blake2_256(data))
    }
}

pub fn blake2_256(data: &[u8]) -> [u8; 32] {
    let mut dest = [0; 32];
    dest.copy_from_slice(Blake2b256::digest(data).as_slice());
    dest
}
