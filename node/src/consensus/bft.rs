//! Generic epoch engine.
//!
//! One engine runs per group and per [`ProposalKind`]. It owns an arena of ACS instances keyed by
//! epoch, proposes through an [`AgreementHandler`] and hands agreed values back to it strictly in
//! epoch order.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, error, info, trace};
use thiserror::Error;

use crate::block::{BlockBuildError, BufferError};
use crate::broadcast::{ConsensusMessage, Outbound, ProposalKind};
use crate::consensus::acs::{Acs, AcsError};
use crate::consensus::{ErrorClass, GroupContext};
use crate::utilities::PublicKey;

#[derive(Error, Debug)]
pub enum BftError {
    #[error("Epoch {epoch} is already finalized")]
    StaleEpoch { epoch: u64 },
    #[error("Epoch {epoch} is too far ahead of finalized epoch {finalized}")]
    EpochTooFarAhead { epoch: u64, finalized: u64 },
    #[error("Message for group {0}")]
    WrongGroup(String),
    #[error("Message for {0} agreement")]
    WrongKind(ProposalKind),
    #[error("{0} is not a producer")]
    NotAProducer(PublicKey),
    #[error("Invalid message signature from {0}")]
    InvalidSignature(PublicKey),
    #[error(transparent)]
    Acs(#[from] AcsError),
    #[error("Buffer: {0}")]
    Buffer(#[from] BufferError),
    #[error("Block build: {0}")]
    BlockBuild(#[from] BlockBuildError),
    #[error("Encoding: {0}")]
    Encoding(#[from] anyhow::Error),
}

impl BftError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BftError::StaleEpoch { .. } => ErrorClass::StaleEpoch,
            BftError::InvalidSignature(_) => ErrorClass::Verification,
            BftError::EpochTooFarAhead { .. }
            | BftError::WrongGroup(_)
            | BftError::WrongKind(_)
            | BftError::NotAProducer(_) => ErrorClass::ProtocolViolation,
            BftError::Acs(err) => err.class(),
            BftError::Buffer(_) | BftError::BlockBuild(_) | BftError::Encoding(_) => {
                ErrorClass::Internal
            }
        }
    }
}

/// What a concrete agreement proposes and does with the result.
pub(crate) trait AgreementHandler: Send {
    fn kind(&self) -> ProposalKind;

    /// Local proposal for `epoch`, `None` if there is nothing to propose. `joining` is set when
    /// the proposal answers an epoch started by another producer.
    fn next_proposal(&mut self, epoch: u64, joining: bool) -> Result<Option<Vec<u8>>, BftError>;

    /// Called exactly once per epoch, in epoch order. An error keeps the epoch open.
    fn on_agreement(
        &mut self,
        epoch: u64,
        results: &BTreeMap<PublicKey, Vec<u8>>,
    ) -> Result<(), BftError>;

    /// Whether a producer that sees messages for an epoch it has not proposed in joins it.
    fn propose_on_join(&self) -> bool {
        false
    }
}

pub(crate) struct Bft<H: AgreementHandler> {
    ctx: Arc<GroupContext>,
    handler: H,
    epochs: BTreeMap<u64, Acs>,
    /// Agreed but not yet applied, normally empty or holding one stalled epoch.
    agreed: BTreeMap<u64, BTreeMap<PublicKey, Vec<u8>>>,
    finalized: u64,
}

impl<H: AgreementHandler> Bft<H> {
    pub(crate) fn new(ctx: Arc<GroupContext>, handler: H, finalized: u64) -> Self {
        Bft {
            ctx,
            handler,
            epochs: BTreeMap::new(),
            agreed: BTreeMap::new(),
            finalized,
        }
    }

    pub(crate) fn finalized_epoch(&self) -> u64 {
        self.finalized
    }

    pub(crate) fn handler(&self) -> &H {
        &self.handler
    }

    pub(crate) fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub(crate) fn open_epochs(&self) -> Vec<u64> {
        self.epochs.keys().copied().collect()
    }

    /// The next epoch has agreed but could not be applied.
    pub(crate) fn is_stalled(&self) -> bool {
        self.agreed.contains_key(&(self.finalized + 1))
    }

    pub(crate) fn handle_message(
        &mut self,
        message: ConsensusMessage,
    ) -> Result<Vec<Outbound>, BftError> {
        let epoch = message.epoch;
        self.check_message(&message)?;

        let ctx = self.ctx.clone();
        let kind = self.handler.kind();
        let acs = self.epochs.entry(epoch).or_insert_with(|| {
            debug!("<{}> epoch {epoch}: create new {kind} ACS", ctx.group_id());
            Acs::new(ctx, kind, epoch)
        });
        let outcome = acs.handle_message(message)?;
        let join = self.handler.propose_on_join() && !acs.has_proposed() && !acs.is_decided();

        let mut outbound = outcome.outbound;
        if let Some(results) = outcome.decided {
            self.agreed.insert(epoch, results);
        }
        if join {
            match self.input_proposal(epoch, true) {
                Ok(out) => outbound.extend(out),
                Err(err) => err.class().log(self.ctx.group_id(), epoch, &err),
            }
        }
        self.apply_agreed(&mut outbound);
        Ok(outbound)
    }

    /// Proposes into `epoch` unless there is nothing to propose or a proposal was already made.
    pub(crate) fn propose(&mut self, epoch: u64) -> Result<Vec<Outbound>, BftError> {
        let mut outbound = self.input_proposal(epoch, false)?;
        self.apply_agreed(&mut outbound);
        Ok(outbound)
    }

    pub(crate) fn propose_next(&mut self) -> Result<Vec<Outbound>, BftError> {
        self.propose(self.finalized + 1)
    }

    /// Applies a stalled agreement again, e.g. after the missing parent block was restored.
    pub(crate) fn retry_stalled(&mut self) -> Vec<Outbound> {
        let mut outbound = vec![];
        self.apply_agreed(&mut outbound);
        outbound
    }

    fn check_message(&self, message: &ConsensusMessage) -> Result<(), BftError> {
        if message.group_id != self.ctx.group_id() {
            return Err(BftError::WrongGroup(message.group_id.clone()));
        }
        if message.kind != self.handler.kind() {
            return Err(BftError::WrongKind(message.kind));
        }
        if message.epoch <= self.finalized {
            return Err(BftError::StaleEpoch {
                epoch: message.epoch,
            });
        }
        if !self.ctx.config.is_producer(&message.sender) {
            return Err(BftError::NotAProducer(message.sender.clone()));
        }
        if !message.verify_signature(&self.ctx) {
            return Err(BftError::InvalidSignature(message.sender.clone()));
        }
        if message.epoch > self.finalized + self.ctx.config.epoch_window() {
            return Err(BftError::EpochTooFarAhead {
                epoch: message.epoch,
                finalized: self.finalized,
            });
        }
        Ok(())
    }

    fn input_proposal(&mut self, epoch: u64, joining: bool) -> Result<Vec<Outbound>, BftError> {
        let in_window =
            epoch > self.finalized && epoch <= self.finalized + self.ctx.config.epoch_window();
        if !in_window || self.agreed.contains_key(&epoch) {
            return Ok(vec![]);
        }
        if let Some(acs) = self.epochs.get(&epoch) {
            if acs.has_proposed() || acs.is_decided() {
                trace!("<{}> epoch {epoch}: already proposed", self.ctx.group_id());
                return Ok(vec![]);
            }
        }
        let Some(value) = self.handler.next_proposal(epoch, joining)? else {
            return Ok(vec![]);
        };

        let ctx = self.ctx.clone();
        let kind = self.handler.kind();
        let acs = self
            .epochs
            .entry(epoch)
            .or_insert_with(|| Acs::new(ctx, kind, epoch));
        let outcome = acs.input_value(&value)?;
        if let Some(results) = outcome.decided {
            self.agreed.insert(epoch, results);
        }
        Ok(outcome.outbound)
    }

    /// Applies agreed epochs in order, evicts their ACS instances and proposes into the next one.
    fn apply_agreed(&mut self, outbound: &mut Vec<Outbound>) {
        loop {
            let epoch = self.finalized + 1;
            let Some(results) = self.agreed.remove(&epoch) else {
                break;
            };
            if let Err(err) = self.handler.on_agreement(epoch, &results) {
                error!(
                    "<{}> epoch {epoch}: {} agreement not applied, epoch stalled: {err}",
                    self.ctx.group_id(),
                    self.handler.kind()
                );
                self.agreed.insert(epoch, results);
                break;
            }

            self.finalized = epoch;
            self.epochs = self.epochs.split_off(&(epoch + 1));
            info!(
                "<{}> epoch {epoch}: {} finalized",
                self.ctx.group_id(),
                self.handler.kind()
            );

            match self.input_proposal(epoch + 1, false) {
                Ok(out) => outbound.extend(out),
                Err(err) => err.class().log(self.ctx.group_id(), epoch + 1, &err),
            }
        }
    }
}
