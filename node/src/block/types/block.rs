use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::block::types::trx::Trx;
use crate::utilities::encoding::encode;
use crate::utilities::hash::Hasher;
use crate::utilities::time::GroupTime;
use crate::utilities::{HashType, Merkle, PublicKey, Signature, Signer};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockHeader {
    pub group_id: String,
    pub epoch: u64,
    pub prev_hash: HashType,
    pub producer: PublicKey,
    pub timestamp: i64,
    ///Merkle root over the hashes of `trxs`, zero for an empty block
    pub trx_hash: HashType,
}

impl Display for BlockHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let group = &self.group_id;
        let epoch = self.epoch;
        let producer = &self.producer;
        let prev = &self.prev_hash;
        write!(
            f,
            "group: {group}, epoch: {epoch}, producer: {producer}, prev_hash: {prev}",
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Block {
    pub header: BlockHeader,
    pub trxs: Vec<Trx>,
    pub hash: HashType,
    ///Producer's signature over `hash`
    pub signature: Signature,
}

impl Block {
    /// Builds and signs the block following `parent`.
    pub fn new(parent: &Block, trxs: Vec<Trx>, signer: &dyn Signer) -> anyhow::Result<Self> {
        let header = BlockHeader {
            group_id: parent.header.group_id.clone(),
            epoch: parent.header.epoch + 1,
            prev_hash: parent.hash,
            producer: signer.public_key(),
            timestamp: GroupTime::now_nanos(),
            trx_hash: Self::trx_root(&trxs)?,
        };
        Self::sign(header, trxs, signer)
    }

    pub fn new_genesis(group_id: &str, signer: &dyn Signer) -> anyhow::Result<Self> {
        let header = BlockHeader {
            group_id: group_id.to_string(),
            epoch: 0,
            prev_hash: HashType::default(),
            producer: signer.public_key(),
            timestamp: GroupTime::now_nanos(),
            trx_hash: HashType::default(),
        };
        Self::sign(header, vec![], signer)
    }

    fn sign(header: BlockHeader, trxs: Vec<Trx>, signer: &dyn Signer) -> anyhow::Result<Self> {
        let hash = Self::header_hash(&header)?;
        let signature = signer.sign(&hash)?;
        Ok(Self {
            header,
            trxs,
            hash,
            signature,
        })
    }

    pub fn header_hash(header: &BlockHeader) -> anyhow::Result<HashType> {
        Ok(Hasher::digest(&encode(header)?))
    }

    pub fn trx_root(trxs: &[Trx]) -> anyhow::Result<HashType> {
        if trxs.is_empty() {
            return Ok(HashType::default());
        }
        let leaves = trxs.iter().map(Trx::hash).collect::<anyhow::Result<Vec<_>>>()?;
        let (root, _) = Merkle::build(&leaves)?;
        Ok(root)
    }

    /// Checks hashes and the producer's signature.
    pub fn verify(&self, signer: &dyn Signer) -> anyhow::Result<bool> {
        if Self::trx_root(&self.trxs)? != self.header.trx_hash {
            return Ok(false);
        }
        if Self::header_hash(&self.header)? != self.hash {
            return Ok(false);
        }
        Ok(signer.verify(&self.header.producer, &self.hash, &self.signature))
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, trxs: {}, hash: {}", self.header, self.trxs.len(), self.hash)
    }
}

#[cfg(test)]
mod test {
    use crate::utilities::Ed25519Keypair;

    use super::*;

    #[test]
    fn test_chain_and_verify() {
        let keypair = Ed25519Keypair::generate();
        let genesis = Block::new_genesis("group", &keypair).unwrap();
        assert_eq!(genesis.header.epoch, 0);
        assert!(genesis.verify(&keypair).unwrap());

        let trxs = vec![
            Trx::signed("group", vec![1], &keypair).unwrap(),
            Trx::signed("group", vec![2], &keypair).unwrap(),
        ];
        let block = Block::new(&genesis, trxs, &keypair).unwrap();
        assert_eq!(block.header.epoch, 1);
        assert_eq!(block.header.prev_hash, genesis.hash);
        assert!(block.verify(&keypair).unwrap());

        let mut tampered = block.clone();
        tampered.trxs.pop();
        assert!(!tampered.verify(&keypair).unwrap());
    }
}
