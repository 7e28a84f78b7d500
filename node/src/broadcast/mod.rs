//! Erasure coded reliable broadcast.
//!
//! One [`rbc::Rbc`] instance exists per (epoch, proposer). The proposer splits its value into one
//! shard per producer and commits to all shards with a Merkle root:
//!
//! INIT_PROPOSE:
//!     1. Proposer sends every producer its own shard together with the Merkle proof.
//!     2. A producer receiving its shard from the proposer broadcasts it as ECHO.
//! ECHO:
//!     1. After `N - f` valid echoes for a root the producer reconstructs the value, re-encodes it
//!        and, if the root matches, broadcasts READY.
//! READY:
//!     1. After `f + 1` readys a producer that has not sent READY yet sends it.
//!     2. After `2f + 1` readys and `N - 2f` echoes the value is reconstructed and delivered.
//!
//! Instances never call out. Every handler returns the messages to send and whether the value was
//! delivered, the surrounding ACS decides what to do with it.

use serde::{Deserialize, Serialize};

use crate::consensus::GroupContext;
use crate::utilities::crypto::KeyPairError;
use crate::utilities::encoding::encode;
use crate::utilities::hash::Hasher;
use crate::utilities::id::{generate_message_id, MessageId};
use crate::utilities::{HashType, MerkleProof, PublicKey, Signature};

pub(crate) mod quorum;
pub(crate) mod rbc;

/// Which agreement a consensus message belongs to. Every kind runs the same engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProposalKind {
    Trx,
    ProducerSync,
}

impl ProposalKind {
    fn tag(&self) -> u8 {
        match self {
            ProposalKind::Trx => 1,
            ProposalKind::ProducerSync => 2,
        }
    }
}

impl std::fmt::Display for ProposalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProposalKind::Trx => write!(f, "trx"),
            ProposalKind::ProducerSync => write!(f, "psync"),
        }
    }
}

/// One shard of a proposal with everything needed to check it against the proposer's root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardProof {
    pub root_hash: HashType,
    pub path: Vec<HashType>,
    pub index: usize,
    pub leaf_count: usize,
    pub shard: Vec<u8>,
    pub proposer: PublicKey,
    /// Proposer's signature over [`proposal_hash`].
    pub proposer_signature: Signature,
}

impl ShardProof {
    pub fn verify_merkle(&self) -> bool {
        MerkleProof {
            root: self.root_hash,
            path: self.path.clone(),
            index: self.index,
            leaf_count: self.leaf_count,
        }
        .verify(&self.shard)
    }
}

/// "I have seen enough matching echoes for `root_hash`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    pub root_hash: HashType,
    pub proposer: PublicKey,
    pub signer: PublicKey,
    /// Signer's signature over [`ready_hash`].
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RbcPayload {
    InitPropose(ShardProof),
    Echo(ShardProof),
    Ready(Ready),
}

impl RbcPayload {
    pub fn name(&self) -> &'static str {
        match self {
            RbcPayload::InitPropose(_) => "INIT_PROPOSE",
            RbcPayload::Echo(_) => "ECHO",
            RbcPayload::Ready(_) => "READY",
        }
    }
}

/// Signed envelope exchanged between producers of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusMessage {
    pub msg_id: MessageId,
    pub group_id: String,
    pub kind: ProposalKind,
    pub epoch: u64,
    ///Producer whose broadcast this message belongs to
    pub proposer: PublicKey,
    ///Producer that created this message(with gossip it can arrive through a different peer)
    pub sender: PublicKey,
    pub payload: RbcPayload,
    pub signature: Signature,
}

#[derive(Serialize)]
struct UnsignedMessage<'a> {
    msg_id: &'a str,
    group_id: &'a str,
    kind: ProposalKind,
    epoch: u64,
    proposer: &'a PublicKey,
    sender: &'a PublicKey,
    payload: &'a RbcPayload,
}

impl ConsensusMessage {
    /// Creates a message from the local producer and signs it.
    pub(crate) fn new(
        ctx: &GroupContext,
        kind: ProposalKind,
        epoch: u64,
        proposer: PublicKey,
        payload: RbcPayload,
    ) -> Result<Self, KeyPairError> {
        let mut message = ConsensusMessage {
            msg_id: generate_message_id(),
            group_id: ctx.config.group_id().to_string(),
            kind,
            epoch,
            proposer,
            sender: ctx.config.my_pubkey().clone(),
            payload,
            signature: Signature::default(),
        };
        let hash = message.signing_hash()?;
        message.signature = ctx.signer.sign(&hash)?;
        Ok(message)
    }

    pub fn signing_hash(&self) -> Result<HashType, KeyPairError> {
        let unsigned = UnsignedMessage {
            msg_id: &self.msg_id,
            group_id: &self.group_id,
            kind: self.kind,
            epoch: self.epoch,
            proposer: &self.proposer,
            sender: &self.sender,
            payload: &self.payload,
        };
        let bytes = encode(unsigned).map_err(|e| KeyPairError::Signing(e.to_string()))?;
        Ok(Hasher::digest(&bytes))
    }

    /// Checks that `sender` signed this message.
    pub(crate) fn verify_signature(&self, ctx: &GroupContext) -> bool {
        match self.signing_hash() {
            Ok(hash) => ctx.signer.verify(&self.sender, &hash, &self.signature),
            Err(_) => false,
        }
    }
}

/// Where an outgoing message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// To every other producer of the group.
    Broadcast(ConsensusMessage),
    SendTo(PublicKey, ConsensusMessage),
}

impl Outbound {
    pub fn message(&self) -> &ConsensusMessage {
        match self {
            Outbound::Broadcast(message) | Outbound::SendTo(_, message) => message,
        }
    }
}

/// What the proposer signs when it commits to a root.
pub fn proposal_hash(kind: ProposalKind, epoch: u64, root_hash: &HashType) -> HashType {
    let mut hasher = Hasher::default();
    hasher
        .update(b"propose")
        .update([kind.tag()])
        .update(epoch.to_be_bytes())
        .update(root_hash);
    hasher.finish()
}

/// What a producer signs when it sends READY.
pub fn ready_hash(
    kind: ProposalKind,
    epoch: u64,
    proposer: &PublicKey,
    root_hash: &HashType,
) -> HashType {
    let mut hasher = Hasher::default();
    hasher
        .update(b"ready")
        .update([kind.tag()])
        .update(epoch.to_be_bytes())
        .update(proposer.as_str())
        .update(root_hash);
    hasher.finish()
}
