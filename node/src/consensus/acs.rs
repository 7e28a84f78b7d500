use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::broadcast::rbc::{Rbc, RbcError, RbcOutcome};
use crate::broadcast::{ConsensusMessage, Outbound, ProposalKind};
use crate::consensus::{ErrorClass, GroupContext};
use crate::utilities::PublicKey;

#[derive(Error, Debug)]
pub enum AcsError {
    #[error("No broadcast instance for local key {0}")]
    NoSuchRbcInstance(PublicKey),
    #[error("Unknown proposer {0}")]
    UnknownProposer(PublicKey),
    #[error(transparent)]
    Rbc(#[from] RbcError),
}

impl AcsError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AcsError::NoSuchRbcInstance(_) => ErrorClass::Configuration,
            AcsError::UnknownProposer(_) => ErrorClass::ProtocolViolation,
            AcsError::Rbc(err) => err.class(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct AcsOutcome {
    pub(crate) outbound: Vec<Outbound>,
    /// Decoded values of the first `N - f` proposers to complete. Set once per instance.
    pub(crate) decided: Option<BTreeMap<PublicKey, Vec<u8>>>,
}

/// Asynchronous common subset for one epoch.
///
/// The epoch is agreed as soon as `N - f` broadcasts have decoded. There is no binary agreement
/// round, so an epoch in which fewer than `N - f` broadcasts can complete never decides.
pub(crate) struct Acs {
    ctx: Arc<GroupContext>,
    kind: ProposalKind,
    epoch: u64,
    rbc_instances: BTreeMap<PublicKey, Rbc>,
    rbc_output: BTreeSet<PublicKey>,
    rbc_results: BTreeMap<PublicKey, Vec<u8>>,
    decided: bool,
}

impl Acs {
    pub(crate) fn new(ctx: Arc<GroupContext>, kind: ProposalKind, epoch: u64) -> Self {
        let rbc_instances = ctx
            .config
            .nodes()
            .iter()
            .map(|node| (node.clone(), Rbc::new(ctx.clone(), kind, epoch, node.clone())))
            .collect();
        Acs {
            ctx,
            kind,
            epoch,
            rbc_instances,
            rbc_output: BTreeSet::new(),
            rbc_results: BTreeMap::new(),
            decided: false,
        }
    }

    /// Feeds the local proposal into the local producer's broadcast.
    pub(crate) fn input_value(&mut self, value: &[u8]) -> Result<AcsOutcome, AcsError> {
        let me = self.ctx.config.my_pubkey().clone();
        let rbc = self
            .rbc_instances
            .get_mut(&me)
            .ok_or_else(|| AcsError::NoSuchRbcInstance(me.clone()))?;
        let outcome = rbc.input(value)?;
        Ok(self.absorb(me, outcome))
    }

    /// Routes a message to the broadcast of its proposer.
    pub(crate) fn handle_message(
        &mut self,
        message: ConsensusMessage,
    ) -> Result<AcsOutcome, AcsError> {
        let proposer = message.proposer;
        let rbc = self
            .rbc_instances
            .get_mut(&proposer)
            .ok_or_else(|| AcsError::UnknownProposer(proposer.clone()))?;
        let outcome = rbc.handle_message(&message.sender, message.payload)?;
        Ok(self.absorb(proposer, outcome))
    }

    pub(crate) fn has_proposed(&self) -> bool {
        self.rbc_instances
            .get(self.ctx.config.my_pubkey())
            .map_or(false, Rbc::is_proposed)
    }

    pub(crate) fn is_decided(&self) -> bool {
        self.decided
    }

    fn absorb(&mut self, proposer: PublicKey, outcome: RbcOutcome) -> AcsOutcome {
        let decided = if outcome.delivered {
            self.rbc_done(proposer)
        } else {
            None
        };
        AcsOutcome {
            outbound: outcome.outbound,
            decided,
        }
    }

    fn rbc_done(&mut self, proposer: PublicKey) -> Option<BTreeMap<PublicKey, Vec<u8>>> {
        let output = self
            .rbc_instances
            .get(&proposer)
            .and_then(Rbc::output)
            .map(<[u8]>::to_vec)?;
        self.rbc_output.insert(proposer.clone());
        debug!(
            "<{}> epoch {}: {} broadcast of {} done, {}/{}",
            self.ctx.group_id(),
            self.epoch,
            self.kind,
            proposer,
            self.rbc_output.len(),
            self.ctx.config.acs_quorum()
        );

        if self.decided {
            return None;
        }
        self.rbc_results.insert(proposer, output);
        if self.rbc_output.len() < self.ctx.config.acs_quorum() {
            return None;
        }

        self.decided = true;
        info!(
            "<{}> epoch {}: {} agreed on proposals from {:?}",
            self.ctx.group_id(),
            self.epoch,
            self.kind,
            self.rbc_results.keys().collect::<Vec<_>>()
        );
        Some(self.rbc_results.clone())
    }
}
