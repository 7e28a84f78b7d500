use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use log::{debug, trace, warn};
use thiserror::Error;

use crate::broadcast::quorum::RbcQuorum;
use crate::broadcast::{
    proposal_hash, ready_hash, ConsensusMessage, Outbound, ProposalKind, RbcPayload, Ready,
    ShardProof,
};
use crate::coding::CodingError;
use crate::consensus::{ErrorClass, GroupContext};
use crate::utilities::merkle::MerkleError;
use crate::utilities::{HashType, KeyPairError, Merkle, PublicKey};

#[derive(Error, Debug)]
pub enum RbcError {
    #[error("A value was already proposed in this broadcast")]
    AlreadyProposed,
    #[error("Only {0} can propose in this broadcast")]
    NotProposer(PublicKey),
    #[error("Expected {expected}, got {got}")]
    UnexpectedSender { expected: PublicKey, got: PublicKey },
    #[error("{0} is not a producer")]
    UnknownSender(PublicKey),
    #[error("Invalid shard proof from {0}")]
    InvalidProof(PublicKey),
    #[error("Invalid signature by {0}")]
    InvalidSignature(PublicKey),
    #[error("Duplicate echo from {0}")]
    DuplicateEcho(PublicKey),
    #[error("Duplicate ready from {0}")]
    DuplicateReady(PublicKey),
    #[error("{0} already echoed a different root")]
    ConflictingEcho(PublicKey),
    #[error("{0} already sent ready for a different root")]
    ConflictingReady(PublicKey),
    #[error("Coding: {0}")]
    Coding(#[from] CodingError),
    #[error("Merkle: {0}")]
    Merkle(#[from] MerkleError),
    #[error("Signing: {0}")]
    Signing(#[from] KeyPairError),
}

impl RbcError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RbcError::InvalidProof(_) | RbcError::InvalidSignature(_) => ErrorClass::Verification,
            RbcError::UnexpectedSender { .. }
            | RbcError::UnknownSender(_)
            | RbcError::DuplicateEcho(_)
            | RbcError::DuplicateReady(_)
            | RbcError::ConflictingEcho(_)
            | RbcError::ConflictingReady(_) => ErrorClass::ProtocolViolation,
            RbcError::NotProposer(_) => ErrorClass::Configuration,
            RbcError::AlreadyProposed
            | RbcError::Coding(_)
            | RbcError::Merkle(_)
            | RbcError::Signing(_) => ErrorClass::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum RbcState {
    Idle,
    /// Local value split and sent out, proposer only.
    Proposed,
    /// Own shard received and echoed.
    Echoing,
    /// READY sent, waiting for enough readys and echoes to decode.
    ReadyPending,
    Decoded,
}

#[derive(Debug, Default)]
pub(crate) struct RbcOutcome {
    pub(crate) outbound: Vec<Outbound>,
    /// Set exactly once per instance, by the call that decoded the value.
    pub(crate) delivered: bool,
}

/// Reliable broadcast of one proposer's value in one epoch.
pub(crate) struct Rbc {
    ctx: Arc<GroupContext>,
    quorum: RbcQuorum,
    kind: ProposalKind,
    epoch: u64,
    proposer: PublicKey,
    state: RbcState,
    proposed: bool,
    echo_sent: bool,
    recv_echos: HashMap<HashType, HashMap<PublicKey, ShardProof>>,
    recv_readys: HashMap<HashType, HashSet<PublicKey>>,
    /// The single root each producer echoed, own echo included.
    echoed_roots: HashMap<PublicKey, HashType>,
    /// The single root each producer sent READY for, own READY included.
    ready_roots: HashMap<PublicKey, HashType>,
    ready_sent: Option<HashType>,
    /// Roots whose proposer signature has been checked.
    signed_roots: HashSet<HashType>,
    /// Roots whose shards do not re-encode to the same root.
    inconsistent_roots: HashSet<HashType>,
    reconstructed: HashMap<HashType, Vec<u8>>,
    decoded_root: Option<HashType>,
    output: Option<Vec<u8>>,
}

impl Rbc {
    pub(crate) fn new(
        ctx: Arc<GroupContext>,
        kind: ProposalKind,
        epoch: u64,
        proposer: PublicKey,
    ) -> Self {
        let quorum = RbcQuorum::new(&ctx.config);
        Rbc {
            ctx,
            quorum,
            kind,
            epoch,
            proposer,
            state: RbcState::Idle,
            proposed: false,
            echo_sent: false,
            recv_echos: HashMap::new(),
            recv_readys: HashMap::new(),
            echoed_roots: HashMap::new(),
            ready_roots: HashMap::new(),
            ready_sent: None,
            signed_roots: HashSet::new(),
            inconsistent_roots: HashSet::new(),
            reconstructed: HashMap::new(),
            decoded_root: None,
            output: None,
        }
    }

    pub(crate) fn state(&self) -> RbcState {
        self.state
    }

    pub(crate) fn output(&self) -> Option<&[u8]> {
        self.output.as_deref()
    }

    pub(crate) fn is_proposed(&self) -> bool {
        self.proposed
    }

    /// Splits `data` into shards and sends each producer its own. Proposer only, one shot.
    pub(crate) fn input(&mut self, data: &[u8]) -> Result<RbcOutcome, RbcError> {
        if self.ctx.config.my_pubkey() != &self.proposer {
            return Err(RbcError::NotProposer(self.proposer.clone()));
        }
        if self.proposed {
            return Err(RbcError::AlreadyProposed);
        }

        let shards = self.ctx.codec.split(data)?;
        let (root, proofs) = Merkle::build(&shards)?;
        let proposer_signature = self
            .ctx
            .signer
            .sign(&proposal_hash(self.kind, self.epoch, &root))?;

        self.proposed = true;
        self.state = RbcState::Proposed;
        self.signed_roots.insert(root);
        debug!(
            "<{}> epoch {}: {} proposing {} bytes, root {}",
            self.ctx.group_id(),
            self.epoch,
            self.kind,
            data.len(),
            root
        );

        let mut outcome = RbcOutcome::default();
        let mut own_shard = None;
        let nodes = self.ctx.config.nodes().to_vec();
        for ((shard, proof), node) in shards.into_iter().zip(proofs).zip(nodes) {
            let shard_proof = ShardProof {
                root_hash: root,
                path: proof.path,
                index: proof.index,
                leaf_count: proof.leaf_count,
                shard,
                proposer: self.proposer.clone(),
                proposer_signature: proposer_signature.clone(),
            };
            if &node == self.ctx.config.my_pubkey() {
                own_shard = Some(shard_proof);
            } else {
                let message = self.message(RbcPayload::InitPropose(shard_proof))?;
                outcome.outbound.push(Outbound::SendTo(node, message));
            }
        }

        if let Some(shard_proof) = own_shard {
            self.on_init_propose(shard_proof, &mut outcome)?;
        }
        Ok(outcome)
    }

    /// Handles a message from `sender`. The envelope signature is already checked by the caller.
    pub(crate) fn handle_message(
        &mut self,
        sender: &PublicKey,
        payload: RbcPayload,
    ) -> Result<RbcOutcome, RbcError> {
        trace!(
            "<{}> epoch {}: {} {} from {} for proposer {}",
            self.ctx.group_id(),
            self.epoch,
            self.kind,
            payload.name(),
            sender,
            self.proposer
        );
        let mut outcome = RbcOutcome::default();
        match payload {
            RbcPayload::InitPropose(proof) => {
                if sender != &self.proposer {
                    return Err(RbcError::UnexpectedSender {
                        expected: self.proposer.clone(),
                        got: sender.clone(),
                    });
                }
                self.on_init_propose(proof, &mut outcome)?;
            }
            RbcPayload::Echo(proof) => self.on_echo(sender.clone(), proof, &mut outcome)?,
            RbcPayload::Ready(ready) => self.on_ready(sender.clone(), ready, &mut outcome)?,
        }
        Ok(outcome)
    }

    fn on_init_propose(
        &mut self,
        proof: ShardProof,
        outcome: &mut RbcOutcome,
    ) -> Result<(), RbcError> {
        if self.echo_sent {
            trace!("Ignoring repeated INIT_PROPOSE from {}", self.proposer);
            return Ok(());
        }
        let me = self.ctx.config.my_pubkey().clone();
        let my_index = self.index_of(&me)?;
        let proposer = self.proposer.clone();
        self.verify_shard(&proof, my_index, &proposer)?;

        self.echo_sent = true;
        if self.state < RbcState::Echoing {
            self.state = RbcState::Echoing;
        }
        let message = self.message(RbcPayload::Echo(proof.clone()))?;
        outcome.outbound.push(Outbound::Broadcast(message));
        self.record_echo(me, proof, outcome)
    }

    fn on_echo(
        &mut self,
        sender: PublicKey,
        proof: ShardProof,
        outcome: &mut RbcOutcome,
    ) -> Result<(), RbcError> {
        if self.is_stale_root(&proof.root_hash) {
            return Ok(());
        }
        let index = self.index_of(&sender)?;
        self.verify_shard(&proof, index, &sender)?;
        self.record_echo(sender, proof, outcome)
    }

    fn on_ready(
        &mut self,
        sender: PublicKey,
        ready: Ready,
        outcome: &mut RbcOutcome,
    ) -> Result<(), RbcError> {
        if ready.proposer != self.proposer {
            return Err(RbcError::UnexpectedSender {
                expected: self.proposer.clone(),
                got: ready.proposer,
            });
        }
        if ready.signer != sender {
            return Err(RbcError::UnexpectedSender {
                expected: sender,
                got: ready.signer,
            });
        }
        if self.is_stale_root(&ready.root_hash) {
            return Ok(());
        }
        self.index_of(&sender)?;
        let hash = ready_hash(self.kind, self.epoch, &self.proposer, &ready.root_hash);
        if !self.ctx.signer.verify(&sender, &hash, &ready.signature) {
            return Err(RbcError::InvalidSignature(sender));
        }

        let root = ready.root_hash;
        match self.ready_roots.get(&sender) {
            Some(previous) if previous == &root => return Err(RbcError::DuplicateReady(sender)),
            Some(_) => return Err(RbcError::ConflictingReady(sender)),
            None => {}
        }
        self.ready_roots.insert(sender.clone(), root);
        self.recv_readys.entry(root).or_default().insert(sender);
        self.progress(root, outcome)
    }

    fn record_echo(
        &mut self,
        sender: PublicKey,
        proof: ShardProof,
        outcome: &mut RbcOutcome,
    ) -> Result<(), RbcError> {
        let root = proof.root_hash;
        match self.echoed_roots.get(&sender) {
            Some(previous) if previous == &root => return Err(RbcError::DuplicateEcho(sender)),
            Some(_) => return Err(RbcError::ConflictingEcho(sender)),
            None => {}
        }
        self.echoed_roots.insert(sender.clone(), root);
        self.recv_echos.entry(root).or_default().insert(sender, proof);
        self.progress(root, outcome)
    }

    fn progress(&mut self, root: HashType, outcome: &mut RbcOutcome) -> Result<(), RbcError> {
        if self.output.is_some() {
            return Ok(());
        }

        if self.ready_sent.is_none() {
            let echoes = self.echo_count(&root);
            let readys = self.ready_count(&root);
            let echo_quorum = self.quorum.check_echo(&root, echoes, false).is_ready()
                && self.reconstruct(&root);
            let ready_quorum = self
                .quorum
                .check_ready(&root, readys, echoes, false)
                .is_ready();
            if echo_quorum || ready_quorum {
                self.send_ready(root, outcome)?;
            }
        }

        let echoes = self.echo_count(&root);
        let readys = self.ready_count(&root);
        let deliver = self.quorum.check_ready(&root, readys, echoes, true).is_deliver();
        if deliver && self.reconstruct(&root) {
            self.output = self.reconstructed.remove(&root);
            self.reconstructed.clear();
            self.decoded_root = Some(root);
            self.state = RbcState::Decoded;
            outcome.delivered = true;
            debug!(
                "<{}> epoch {}: {} broadcast from {} decoded, root {}",
                self.ctx.group_id(),
                self.epoch,
                self.kind,
                self.proposer,
                root
            );
        }
        Ok(())
    }

    fn send_ready(&mut self, root: HashType, outcome: &mut RbcOutcome) -> Result<(), RbcError> {
        let me = self.ctx.config.my_pubkey().clone();
        let signature = self
            .ctx
            .signer
            .sign(&ready_hash(self.kind, self.epoch, &self.proposer, &root))?;
        let ready = Ready {
            root_hash: root,
            proposer: self.proposer.clone(),
            signer: me.clone(),
            signature,
        };
        let message = self.message(RbcPayload::Ready(ready))?;
        outcome.outbound.push(Outbound::Broadcast(message));

        self.ready_sent = Some(root);
        self.ready_roots.insert(me.clone(), root);
        self.recv_readys.entry(root).or_default().insert(me);
        self.state = RbcState::ReadyPending;
        Ok(())
    }

    /// Tries to rebuild the value for `root` from the recorded echoes.
    ///
    /// Below the decode threshold this only means "not yet". Past it every shard carries a valid
    /// proof for `root`, so a failed decode or a re-encode to a different root means the proposer
    /// committed to something that is not a codeword, and the root is never tried again.
    fn reconstruct(&mut self, root: &HashType) -> bool {
        if self.reconstructed.contains_key(root) {
            return true;
        }
        if self.inconsistent_roots.contains(root) {
            return false;
        }
        let Some(echoes) = self.recv_echos.get(root) else {
            return false;
        };
        if echoes.len() < self.quorum.decode_threshold() {
            return false;
        }

        let shards: BTreeMap<usize, Vec<u8>> = echoes
            .values()
            .map(|proof| (proof.index, proof.shard.clone()))
            .collect();
        let value = match self.ctx.codec.reconstruct(&shards) {
            Ok(value) => value,
            Err(err) => {
                self.mark_inconsistent(root, &err);
                return false;
            }
        };

        let consistent = self
            .ctx
            .codec
            .split(&value)
            .ok()
            .and_then(|shards| Merkle::build(&shards).ok())
            .map_or(false, |(rebuilt, _)| &rebuilt == root);
        if !consistent {
            self.mark_inconsistent(root, &"shards re-encode to a different root");
            return false;
        }

        self.reconstructed.insert(*root, value);
        true
    }

    fn mark_inconsistent(&mut self, root: &HashType, reason: &dyn std::fmt::Display) {
        warn!(
            "<{}> epoch {}: {} broadcast from {} is not a valid encoding of root {root}: {reason}",
            self.ctx.group_id(),
            self.epoch,
            self.kind,
            self.proposer,
        );
        self.inconsistent_roots.insert(*root);
    }

    fn verify_shard(
        &mut self,
        proof: &ShardProof,
        expected_index: usize,
        from: &PublicKey,
    ) -> Result<(), RbcError> {
        if proof.proposer != self.proposer
            || proof.index != expected_index
            || proof.leaf_count != self.ctx.config.n()
            || !proof.verify_merkle()
        {
            return Err(RbcError::InvalidProof(from.clone()));
        }
        if !self.signed_roots.contains(&proof.root_hash) {
            let hash = proposal_hash(self.kind, self.epoch, &proof.root_hash);
            if !self
                .ctx
                .signer
                .verify(&self.proposer, &hash, &proof.proposer_signature)
            {
                return Err(RbcError::InvalidSignature(self.proposer.clone()));
            }
            self.signed_roots.insert(proof.root_hash);
        }
        Ok(())
    }

    fn is_stale_root(&self, root: &HashType) -> bool {
        match &self.decoded_root {
            Some(decoded) if decoded != root => {
                trace!("Ignoring message for root {root}, {decoded} already decoded");
                true
            }
            _ => false,
        }
    }

    fn index_of(&self, key: &PublicKey) -> Result<usize, RbcError> {
        self.ctx
            .config
            .index_of(key)
            .ok_or_else(|| RbcError::UnknownSender(key.clone()))
    }

    fn echo_count(&self, root: &HashType) -> usize {
        self.recv_echos.get(root).map_or(0, HashMap::len)
    }

    fn ready_count(&self, root: &HashType) -> usize {
        self.recv_readys.get(root).map_or(0, HashSet::len)
    }

    fn message(&self, payload: RbcPayload) -> Result<ConsensusMessage, RbcError> {
        Ok(ConsensusMessage::new(
            &self.ctx,
            self.kind,
            self.epoch,
            self.proposer.clone(),
            payload,
        )?)
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::consensus::test::{contexts, route, Envelope};
    use crate::utilities::hash::Hasher;
    use crate::utilities::Signature;

    fn instances(ctxs: &[Arc<GroupContext>], proposer: usize) -> Vec<Rbc> {
        let key = ctxs[proposer].config.my_pubkey().clone();
        ctxs.iter()
            .map(|ctx| Rbc::new(ctx.clone(), ProposalKind::Trx, 1, key.clone()))
            .collect()
    }

    /// Delivers queued messages in the order chosen by `pick` until nothing is left. Messages
    /// addressed to `isolated` are collected and returned instead.
    fn run(
        ctxs: &[Arc<GroupContext>],
        rbcs: &mut [Rbc],
        mut queue: Vec<Envelope>,
        isolated: Option<usize>,
        mut pick: impl FnMut(usize) -> usize,
    ) -> (Vec<usize>, Vec<ConsensusMessage>) {
        let mut delivered = vec![0; rbcs.len()];
        let mut mailbox = vec![];
        while !queue.is_empty() {
            let envelope = queue.remove(pick(queue.len()));
            if Some(envelope.to) == isolated {
                mailbox.push(envelope.message);
                continue;
            }
            let outcome = rbcs[envelope.to]
                .handle_message(&envelope.message.sender, envelope.message.payload)
                .unwrap();
            if outcome.delivered {
                delivered[envelope.to] += 1;
            }
            route(ctxs[0].config.nodes(), envelope.to, outcome.outbound, &mut queue);
        }
        (delivered, mailbox)
    }

    fn start(
        ctxs: &[Arc<GroupContext>],
        rbcs: &mut [Rbc],
        proposer: usize,
        value: &[u8],
    ) -> (Vec<Envelope>, bool) {
        let outcome = rbcs[proposer].input(value).unwrap();
        let mut queue = vec![];
        route(ctxs[0].config.nodes(), proposer, outcome.outbound, &mut queue);
        (queue, outcome.delivered)
    }

    fn find<'a>(
        mailbox: &'a [ConsensusMessage],
        ctx: &GroupContext,
        payload: &str,
    ) -> &'a ConsensusMessage {
        mailbox
            .iter()
            .find(|m| m.payload.name() == payload && &m.sender == ctx.config.my_pubkey())
            .unwrap()
    }

    /// Runs a 4 node broadcast from node 0 with node 1 cut off, returns node 1's mailbox.
    fn isolated_mailbox(
        ctxs: &[Arc<GroupContext>],
        value: &[u8],
    ) -> (Vec<Rbc>, Vec<ConsensusMessage>) {
        let mut rbcs = instances(ctxs, 0);
        let (queue, _) = start(ctxs, &mut rbcs, 0, value);
        let (delivered, mailbox) = run(ctxs, &mut rbcs, queue, Some(1), |_| 0);
        assert_eq!(delivered, vec![1, 0, 1, 1]);
        (rbcs, mailbox)
    }

    #[test]
    fn test_same_value_under_any_delivery_order() {
        let value = b"batch of transactions".repeat(20);
        for n in [4, 7] {
            let ctxs = contexts(n);
            let orders: Vec<Box<dyn FnMut(usize) -> usize>> = vec![
                Box::new(|_| 0),
                Box::new(|len| len - 1),
                Box::new({
                    let mut rng = StdRng::seed_from_u64(7);
                    move |len| rng.gen_range(0..len)
                }),
                Box::new({
                    let mut rng = StdRng::seed_from_u64(1234);
                    move |len| rng.gen_range(0..len)
                }),
            ];
            for pick in orders {
                let mut rbcs = instances(&ctxs, n - 1);
                let (queue, _) = start(&ctxs, &mut rbcs, n - 1, &value);
                let (delivered, _) = run(&ctxs, &mut rbcs, queue, None, pick);
                assert_eq!(delivered, vec![1; n]);
                for rbc in &rbcs {
                    assert_eq!(rbc.output(), Some(value.as_slice()));
                    assert_eq!(rbc.state(), RbcState::Decoded);
                }
            }
        }
    }

    #[test]
    fn test_four_node_walkthrough() {
        let ctxs = contexts(4);
        let (_, mailbox) = isolated_mailbox(&ctxs, b"batch-1");
        let mut b = instances(&ctxs, 0).remove(1);
        let a = &ctxs[0];
        let c = &ctxs[2];

        let init = find(&mailbox, a, "INIT_PROPOSE");
        let outcome = b.handle_message(&init.sender, init.payload.clone()).unwrap();
        assert_eq!(outcome.outbound.len(), 1);
        assert_matches!(
            &outcome.outbound[0],
            Outbound::Broadcast(m) if m.payload.name() == "ECHO"
        );
        assert_eq!(b.state(), RbcState::Echoing);

        let echo = find(&mailbox, a, "ECHO");
        let outcome = b.handle_message(&echo.sender, echo.payload.clone()).unwrap();
        assert!(outcome.outbound.is_empty());

        let echo = find(&mailbox, c, "ECHO");
        let outcome = b.handle_message(&echo.sender, echo.payload.clone()).unwrap();
        assert_eq!(outcome.outbound.len(), 1);
        assert_matches!(
            &outcome.outbound[0],
            Outbound::Broadcast(m) if m.payload.name() == "READY"
        );
        assert_eq!(b.state(), RbcState::ReadyPending);

        let ready = find(&mailbox, a, "READY");
        let outcome = b.handle_message(&ready.sender, ready.payload.clone()).unwrap();
        assert!(!outcome.delivered);

        let ready = find(&mailbox, c, "READY");
        let outcome = b.handle_message(&ready.sender, ready.payload.clone()).unwrap();
        assert!(outcome.delivered);
        assert!(outcome.outbound.is_empty());
        assert_eq!(b.output(), Some(b"batch-1".as_slice()));

        let echo = find(&mailbox, &ctxs[3], "ECHO");
        let outcome = b.handle_message(&echo.sender, echo.payload.clone()).unwrap();
        assert!(!outcome.delivered);
        assert_eq!(b.state(), RbcState::Decoded);
    }

    #[test]
    fn test_duplicate_echo_counted_once() {
        let ctxs = contexts(4);
        let (_, mailbox) = isolated_mailbox(&ctxs, b"batch-1");
        let mut b = instances(&ctxs, 0).remove(1);

        let init = find(&mailbox, &ctxs[0], "INIT_PROPOSE");
        b.handle_message(&init.sender, init.payload.clone()).unwrap();

        let echo = find(&mailbox, &ctxs[2], "ECHO");
        let outcome = b.handle_message(&echo.sender, echo.payload.clone()).unwrap();
        assert!(outcome.outbound.is_empty());
        assert_matches!(
            b.handle_message(&echo.sender, echo.payload.clone()),
            Err(RbcError::DuplicateEcho(_))
        );
        assert_eq!(b.state(), RbcState::Echoing);

        let echo = find(&mailbox, &ctxs[3], "ECHO");
        let outcome = b.handle_message(&echo.sender, echo.payload.clone()).unwrap();
        assert_eq!(outcome.outbound.len(), 1);
    }

    #[test]
    fn test_readys_before_echoes() {
        let ctxs = contexts(4);
        let (_, mailbox) = isolated_mailbox(&ctxs, b"batch-1");
        let mut b = instances(&ctxs, 0).remove(1);

        let ready = find(&mailbox, &ctxs[0], "READY");
        assert!(b
            .handle_message(&ready.sender, ready.payload.clone())
            .unwrap()
            .outbound
            .is_empty());

        let ready = find(&mailbox, &ctxs[2], "READY");
        let outcome = b.handle_message(&ready.sender, ready.payload.clone()).unwrap();
        assert_eq!(outcome.outbound.len(), 1);
        assert_eq!(b.state(), RbcState::ReadyPending);

        let ready = find(&mailbox, &ctxs[3], "READY");
        let outcome = b.handle_message(&ready.sender, ready.payload.clone()).unwrap();
        assert!(!outcome.delivered);
        assert!(outcome.outbound.is_empty());
        assert_matches!(
            b.handle_message(&ready.sender, ready.payload.clone()),
            Err(RbcError::DuplicateReady(_))
        );

        let init = find(&mailbox, &ctxs[0], "INIT_PROPOSE");
        let outcome = b.handle_message(&init.sender, init.payload.clone()).unwrap();
        assert!(!outcome.delivered);

        let echo = find(&mailbox, &ctxs[3], "ECHO");
        let outcome = b.handle_message(&echo.sender, echo.payload.clone()).unwrap();
        assert!(outcome.delivered);
        assert_eq!(b.output(), Some(b"batch-1".as_slice()));
    }

    #[test]
    fn test_tampered_messages_rejected() {
        let ctxs = contexts(4);
        let (_, mailbox) = isolated_mailbox(&ctxs, b"batch-1");
        let mut b = instances(&ctxs, 0).remove(1);

        let init = find(&mailbox, &ctxs[0], "INIT_PROPOSE");
        let RbcPayload::InitPropose(proof) = init.payload.clone() else {
            panic!("not an init propose");
        };

        let mut tampered = proof.clone();
        tampered.shard[0] ^= 0xff;
        assert_matches!(
            b.handle_message(&init.sender, RbcPayload::InitPropose(tampered)),
            Err(RbcError::InvalidProof(_))
        );

        let mut tampered = proof.clone();
        tampered.proposer_signature = Signature::new(vec![0; 64]);
        assert_matches!(
            b.handle_message(&init.sender, RbcPayload::InitPropose(tampered)),
            Err(RbcError::InvalidSignature(_))
        );

        assert_matches!(
            b.handle_message(
                ctxs[2].config.my_pubkey(),
                RbcPayload::InitPropose(proof.clone())
            ),
            Err(RbcError::UnexpectedSender { .. })
        );

        // An echo must carry the sender's own shard.
        let echo = find(&mailbox, &ctxs[2], "ECHO");
        assert_matches!(
            b.handle_message(ctxs[3].config.my_pubkey(), echo.payload.clone()),
            Err(RbcError::InvalidProof(_))
        );

        let ready = find(&mailbox, &ctxs[2], "READY");
        let RbcPayload::Ready(mut forged) = ready.payload.clone() else {
            panic!("not a ready");
        };
        forged.signature = Signature::new(vec![1; 64]);
        assert_matches!(
            b.handle_message(&ready.sender, RbcPayload::Ready(forged)),
            Err(RbcError::InvalidSignature(_))
        );

        assert_eq!(b.state(), RbcState::Idle);
        let outcome = b.handle_message(&init.sender, init.payload.clone()).unwrap();
        assert_eq!(outcome.outbound.len(), 1);
    }

    #[test]
    fn test_input_rules() {
        let ctxs = contexts(4);
        let mut rbcs = instances(&ctxs, 0);
        rbcs[0].input(b"one").unwrap();
        assert_matches!(rbcs[0].input(b"two"), Err(RbcError::AlreadyProposed));
        assert_matches!(rbcs[1].input(b"one"), Err(RbcError::NotProposer(_)));
    }

    #[test]
    fn test_single_node_delivers_on_input() {
        let ctxs = contexts(1);
        let mut rbcs = instances(&ctxs, 0);
        let (queue, delivered) = start(&ctxs, &mut rbcs, 0, b"solo");
        assert!(delivered);
        assert!(queue.is_empty());
        assert_eq!(rbcs[0].output(), Some(b"solo".as_slice()));
    }
    #[test]
    fn test_one_ready_root_per_signer() {
        let ctxs = contexts(4);
        let mut b = instances(&ctxs, 0).remove(1);
        let c = &ctxs[2];
        let proposer = ctxs[0].config.my_pubkey().clone();

        let ready_for = |seed: u64| {
            let root = Hasher::digest(&seed.to_be_bytes());
            let hash = ready_hash(ProposalKind::Trx, 1, &proposer, &root);
            RbcPayload::Ready(Ready {
                root_hash: root,
                proposer: proposer.clone(),
                signer: c.config.my_pubkey().clone(),
                signature: c.signer.sign(&hash).unwrap(),
            })
        };

        b.handle_message(c.config.my_pubkey(), ready_for(0)).unwrap();
        assert_matches!(
            b.handle_message(c.config.my_pubkey(), ready_for(0)),
            Err(RbcError::DuplicateReady(_))
        );
        for seed in 1..1000 {
            assert_matches!(
                b.handle_message(c.config.my_pubkey(), ready_for(seed)),
                Err(RbcError::ConflictingReady(_))
            );
        }
        assert_eq!(b.recv_readys.len(), 1);
        assert_eq!(b.ready_roots.len(), 1);
    }

    #[test]
    fn test_conflicting_echo_rejected() {
        let ctxs = contexts(4);
        let (_, first) = isolated_mailbox(&ctxs, b"batch-1");
        let (_, second) = isolated_mailbox(&ctxs, b"batch-2");
        let mut b = instances(&ctxs, 0).remove(1);

        let echo = find(&first, &ctxs[2], "ECHO");
        b.handle_message(&echo.sender, echo.payload.clone()).unwrap();
        let echo = find(&second, &ctxs[2], "ECHO");
        assert_matches!(
            b.handle_message(&echo.sender, echo.payload.clone()),
            Err(RbcError::ConflictingEcho(_))
        );
        assert_eq!(b.recv_echos.len(), 1);
    }

    /// Sends every producer its shard of `shards` under a proposer-signed root, as a faulty
    /// proposer would, and runs the broadcast to completion.
    fn run_committed(ctxs: &[Arc<GroupContext>], shards: Vec<Vec<u8>>) -> (Vec<Rbc>, HashType) {
        let proposer = ctxs[0].config.my_pubkey().clone();
        let (root, proofs) = Merkle::build(&shards).unwrap();
        let signature = ctxs[0]
            .signer
            .sign(&proposal_hash(ProposalKind::Trx, 1, &root))
            .unwrap();

        let mut rbcs = instances(ctxs, 0);
        let mut queue = vec![];
        for (to, (shard, proof)) in shards.into_iter().zip(proofs).enumerate() {
            let shard_proof = ShardProof {
                root_hash: root,
                path: proof.path,
                index: proof.index,
                leaf_count: proof.leaf_count,
                shard,
                proposer: proposer.clone(),
                proposer_signature: signature.clone(),
            };
            let message = rbcs[0].message(RbcPayload::InitPropose(shard_proof)).unwrap();
            queue.push(Envelope { to, message });
        }

        while !queue.is_empty() {
            let envelope = queue.remove(0);
            let outcome = rbcs[envelope.to]
                .handle_message(&envelope.message.sender, envelope.message.payload)
                .unwrap();
            assert!(!outcome.delivered);
            for out in &outcome.outbound {
                let message = match out {
                    Outbound::Broadcast(message) | Outbound::SendTo(_, message) => message,
                };
                assert_eq!(message.payload.name(), "ECHO");
            }
            route(ctxs[0].config.nodes(), envelope.to, outcome.outbound, &mut queue);
        }
        (rbcs, root)
    }

    #[test]
    fn test_root_over_non_codeword_never_readies() {
        let ctxs = contexts(4);
        let mut shards = ctxs[0].codec.split(b"batch-1").unwrap();
        shards[3][0] ^= 0xff;

        let (rbcs, root) = run_committed(&ctxs, shards);
        for rbc in &rbcs {
            assert_eq!(rbc.state(), RbcState::Echoing);
            assert_eq!(rbc.output(), None);
            assert!(rbc.ready_sent.is_none());
            assert!(rbc.inconsistent_roots.contains(&root));
        }
    }

    #[test]
    fn test_root_over_unequal_shards_never_readies() {
        let ctxs = contexts(4);
        let mut shards = ctxs[0].codec.split(b"batch-1").unwrap();
        // Every decodable subset mixes a long and a short shard.
        shards[0].extend_from_slice(&[0, 0]);
        shards[1].extend_from_slice(&[0, 0]);

        let (mut rbcs, root) = run_committed(&ctxs, shards);
        for rbc in &mut rbcs {
            assert!(rbc.ready_sent.is_none());
            assert!(rbc.inconsistent_roots.contains(&root));
            assert!(!rbc.reconstruct(&root));
        }
    }
}
