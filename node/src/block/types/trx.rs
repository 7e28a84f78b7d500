use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::utilities::crypto::KeyPairError;
use crate::utilities::encoding::encode;
use crate::utilities::hash::Hasher;
use crate::utilities::id::generate_message_id;
use crate::utilities::time::GroupTime;
use crate::utilities::{HashType, PublicKey, Signature, Signer};

/// A pending transaction of one group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Trx {
    pub trx_id: String,
    pub group_id: String,
    pub sender_pubkey: PublicKey,
    ///Nanoseconds since unix epoch, as seen by the sender
    pub timestamp: i64,
    ///Application specific data
    pub payload: Vec<u8>,
    ///Sender's signature over everything above
    pub signature: Signature,
}

#[derive(Serialize)]
struct UnsignedTrx<'a> {
    trx_id: &'a str,
    group_id: &'a str,
    sender_pubkey: &'a PublicKey,
    timestamp: i64,
    payload: &'a [u8],
}

impl Trx {
    pub fn signed(
        group_id: impl Into<String>,
        payload: Vec<u8>,
        signer: &dyn Signer,
    ) -> Result<Self, KeyPairError> {
        Self::signed_at(group_id, payload, GroupTime::now_nanos(), signer)
    }

    pub fn signed_at(
        group_id: impl Into<String>,
        payload: Vec<u8>,
        timestamp: i64,
        signer: &dyn Signer,
    ) -> Result<Self, KeyPairError> {
        let mut trx = Trx {
            trx_id: generate_message_id(),
            group_id: group_id.into(),
            sender_pubkey: signer.public_key(),
            timestamp,
            payload,
            signature: Signature::default(),
        };
        let hash = trx.signing_hash()?;
        trx.signature = signer.sign(&hash)?;
        Ok(trx)
    }

    pub fn signing_hash(&self) -> Result<HashType, KeyPairError> {
        let unsigned = UnsignedTrx {
            trx_id: &self.trx_id,
            group_id: &self.group_id,
            sender_pubkey: &self.sender_pubkey,
            timestamp: self.timestamp,
            payload: &self.payload,
        };
        let bytes = encode(unsigned).map_err(|e| KeyPairError::Signing(e.to_string()))?;
        Ok(Hasher::digest(&bytes))
    }

    /// Checks the sender's signature.
    pub fn verify(&self, signer: &dyn Signer) -> bool {
        match self.signing_hash() {
            Ok(hash) => signer.verify(&self.sender_pubkey, &hash, &self.signature),
            Err(_) => false,
        }
    }

    /// Hash of the whole trx, signature included. Leaf of the block's trx root.
    pub fn hash(&self) -> anyhow::Result<HashType> {
        Ok(Hasher::digest(&encode(self)?))
    }
}

impl Display for Trx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "id: {}, sender: {}, timestamp: {}",
            self.trx_id, self.sender_pubkey, self.timestamp
        )
    }
}

/// A batch of trxs proposed by one producer in one epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TrxBundle {
    pub trxs: Vec<Trx>,
}

impl TrxBundle {
    pub fn new(trxs: Vec<Trx>) -> Self {
        Self { trxs }
    }
}

#[cfg(test)]
mod test {
    use crate::utilities::Ed25519Keypair;

    use super::*;

    #[test]
    fn test_sign_ok() {
        let keypair = Ed25519Keypair::generate();
        let trx = Trx::signed("group", vec![1, 2, 3], &keypair).unwrap();
        assert_eq!(trx.sender_pubkey, keypair.public_key());
        assert!(trx.verify(&keypair));
    }

    #[test]
    fn test_sign_fail() {
        let keypair = Ed25519Keypair::generate();
        let mut trx = Trx::signed("group", vec![1, 2, 3], &keypair).unwrap();
        trx.payload = vec![3, 2, 1];
        assert!(!trx.verify(&keypair));

        let mut trx = Trx::signed("group", vec![1, 2, 3], &keypair).unwrap();
        trx.sender_pubkey = Ed25519Keypair::generate().public_key();
        assert!(!trx.verify(&keypair));
    }
}
