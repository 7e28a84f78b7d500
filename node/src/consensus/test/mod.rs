use std::sync::Arc;

use crate::broadcast::{ConsensusMessage, Outbound};
use crate::config::ConsensusConfig;
use crate::consensus::GroupContext;
use crate::utilities::{Ed25519Keypair, PublicKey, Signer};


pub(crate) const TEST_GROUP: &str = "test-group";

/// Keypairs sorted by public key, so keypair `i` owns shard `i`.
pub(crate) fn keypairs(n: usize) -> Vec<Arc<Ed25519Keypair>> {
    let mut keypairs: Vec<_> = (0..n).map(|_| Arc::new(Ed25519Keypair::generate())).collect();
    keypairs.sort_by_key(|k| k.public_key());
    keypairs
}

pub(crate) fn public_keys(keypairs: &[Arc<Ed25519Keypair>]) -> Vec<PublicKey> {
    keypairs.iter().map(|k| k.public_key()).collect()
}

pub(crate) fn contexts_for(
    keypairs: &[Arc<Ed25519Keypair>],
    owner: &PublicKey,
    batch_size: usize,
) -> Vec<Arc<GroupContext>> {
    let nodes = public_keys(keypairs);
    keypairs
        .iter()
        .map(|keypair| {
            let config = ConsensusConfig::new(
                TEST_GROUP,
                nodes.clone(),
                keypair.public_key(),
                owner.clone(),
                batch_size,
            )
            .unwrap();
            Arc::new(GroupContext::new(config, keypair.clone()).unwrap())
        })
        .collect()
}

/// One context per producer of an `n` node group, in shard order.
pub(crate) fn contexts(n: usize) -> Vec<Arc<GroupContext>> {
    let keypairs = keypairs(n);
    let owner = keypairs[0].public_key();
    contexts_for(&keypairs, &owner, 10)
}

pub(crate) struct Envelope {
    pub(crate) to: usize,
    pub(crate) message: ConsensusMessage,
}

/// Queues `outbound` from producer `from`. Broadcasts reach every producer except the sender.
pub(crate) fn route(
    nodes: &[PublicKey],
    from: usize,
    outbound: Vec<Outbound>,
    queue: &mut Vec<Envelope>,
) {
    for out in outbound {
        match out {
            Outbound::Broadcast(message) => {
                for to in (0..nodes.len()).filter(|to| *to != from) {
                    queue.push(Envelope {
                        to,
                        message: message.clone(),
                    });
                }
            }
            Outbound::SendTo(key, message) => {
                let to = nodes.iter().position(|n| n == &key).unwrap();
                queue.push(Envelope { to, message });
            }
        }
    }
}
