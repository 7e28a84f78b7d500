//! Producer sync: producers agree on each other's finalized trx epoch.
//!
//! A round is started by one producer on request. Every other producer that sees messages of a
//! round it has not proposed in joins with its own status, so a round completes as soon as `N - f`
//! producers are live.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::broadcast::ProposalKind;
use crate::consensus::bft::{AgreementHandler, BftError};
use crate::consensus::GroupContext;
use crate::utilities::encoding::{decode, encode};
use crate::utilities::hash::Hasher;
use crate::utilities::time::GroupTime;
use crate::utilities::{HashType, PublicKey, Signature};

/// One producer's signed view of its chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub sender: PublicKey,
    /// Last finalized trx epoch of the sender.
    pub epoch: u64,
    pub timestamp: i64,
    pub signature: Signature,
}

impl SyncStatus {
    fn signing_hash(sender: &PublicKey, epoch: u64, timestamp: i64) -> HashType {
        let mut hasher = Hasher::default();
        hasher
            .update(b"psync")
            .update(sender.as_str())
            .update(epoch.to_be_bytes())
            .update(timestamp.to_be_bytes());
        hasher.finish()
    }
}

/// Outcome of one sync round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub round: u64,
    pub highest_epoch: u64,
    /// Producer holding `highest_epoch`, the one to fetch blocks from.
    pub highest_producer: Option<PublicKey>,
    /// The local chain is behind the agreed highest epoch.
    pub behind: bool,
}

pub(crate) struct ProducerSync {
    ctx: Arc<GroupContext>,
    local_epoch: u64,
    requested: bool,
    last_report: Option<SyncReport>,
    reports: Option<UnboundedSender<SyncReport>>,
}

impl ProducerSync {
    pub(crate) fn new(
        ctx: Arc<GroupContext>,
        reports: Option<UnboundedSender<SyncReport>>,
    ) -> Self {
        ProducerSync {
            ctx,
            local_epoch: 0,
            requested: false,
            last_report: None,
            reports,
        }
    }

    pub(crate) fn set_local_epoch(&mut self, epoch: u64) {
        self.local_epoch = epoch;
    }

    /// The next round is proposed by this producer.
    pub(crate) fn request(&mut self) {
        self.requested = true;
    }

    pub(crate) fn last_report(&self) -> Option<&SyncReport> {
        self.last_report.as_ref()
    }

    fn status(&self) -> Result<SyncStatus, BftError> {
        let sender = self.ctx.config.my_pubkey().clone();
        let timestamp = GroupTime::now_nanos();
        let hash = SyncStatus::signing_hash(&sender, self.local_epoch, timestamp);
        let signature = self
            .ctx
            .signer
            .sign(&hash)
            .map_err(|err| BftError::Encoding(anyhow::anyhow!(err)))?;
        Ok(SyncStatus {
            sender,
            epoch: self.local_epoch,
            timestamp,
            signature,
        })
    }

    fn verified_status(&self, proposer: &PublicKey, value: &[u8]) -> Option<SyncStatus> {
        let status = decode::<SyncStatus>(value).ok()?;
        let hash = SyncStatus::signing_hash(&status.sender, status.epoch, status.timestamp);
        let valid = &status.sender == proposer
            && self.ctx.signer.verify(&status.sender, &hash, &status.signature);
        valid.then_some(status)
    }
}

impl AgreementHandler for ProducerSync {
    fn kind(&self) -> ProposalKind {
        ProposalKind::ProducerSync
    }

    fn next_proposal(&mut self, round: u64, joining: bool) -> Result<Option<Vec<u8>>, BftError> {
        if !joining && !self.requested {
            return Ok(None);
        }
        self.requested = false;
        debug!(
            "<{}> psync round {round}: proposing local epoch {}",
            self.ctx.group_id(),
            self.local_epoch
        );
        Ok(Some(encode(self.status()?)?))
    }

    fn on_agreement(
        &mut self,
        round: u64,
        results: &BTreeMap<PublicKey, Vec<u8>>,
    ) -> Result<(), BftError> {
        let mut highest_epoch = self.local_epoch;
        let mut highest_producer = None;
        for (proposer, value) in results {
            let Some(status) = self.verified_status(proposer, value) else {
                warn!(
                    "<{}> psync round {round}: invalid status from {proposer}",
                    self.ctx.group_id()
                );
                continue;
            };
            if status.epoch > highest_epoch {
                highest_epoch = status.epoch;
                highest_producer = Some(status.sender);
            }
        }

        let report = SyncReport {
            round,
            highest_epoch,
            highest_producer,
            behind: highest_epoch > self.local_epoch,
        };
        info!(
            "<{}> psync round {round}: highest epoch {highest_epoch}, local {}",
            self.ctx.group_id(),
            self.local_epoch
        );
        if let Some(reports) = &self.reports {
            if reports.send(report.clone()).is_err() {
                debug!("<{}> psync report receiver dropped", self.ctx.group_id());
            }
        }
        self.last_report = Some(report);
        Ok(())
    }

    fn propose_on_join(&self) -> bool {
        true
    }
}
