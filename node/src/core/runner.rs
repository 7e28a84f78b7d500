use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, error, info, trace};
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{ConsensusMessage, Outbound, ProposalKind};
use crate::consensus::bft::{Bft, BftError};
use crate::consensus::psync::ProducerSync;
use crate::consensus::trx::TrxAgreement;
use crate::consensus::GroupContext;
use crate::core::handle::{GroupCmd, GroupError, GroupStatus, Inbound};
use crate::network::{dispatch, RepeatSender, TransportSink};
use crate::utilities::encoding::decode;

/// Single threaded event loop of one group. Every consensus mutation of the group happens here.
pub struct GroupRunner {
    pub(crate) ctx: Arc<GroupContext>,
    pub(crate) trx: Bft<TrxAgreement>,
    pub(crate) psync: Bft<ProducerSync>,
    pub(crate) transport: Arc<dyn TransportSink>,
    pub(crate) inbound: Receiver<Inbound>,
    pub(crate) commands: Receiver<GroupCmd>,
    pub(crate) shutdown: CancellationToken,
    /// Re-senders of this node's messages, one per open epoch of each kind.
    pub(crate) repeaters: BTreeMap<(ProposalKind, u64), RepeatSender>,
}

impl GroupRunner {
    pub async fn run(mut self) {
        info!("<{}> starting group runner", self.ctx.group_id());
        self.propose_trx();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("<{}> shutting down group runner", self.ctx.group_id());
                    break;
                }

                Some(inbound) = self.inbound.recv() => {
                    self.on_inbound(inbound);
                }

                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => self.on_command(cmd),
                        None => {
                            debug!("<{}> command channel closed", self.ctx.group_id());
                            break;
                        }
                    }
                }
            }
        }

        for repeater in self.repeaters.values() {
            repeater.cancel();
        }
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        let message = match decode::<ConsensusMessage>(&inbound.bytes) {
            Ok(message) => message,
            Err(err) => {
                debug!(
                    "<{}> undecodable message from peer {}: {err}",
                    self.ctx.group_id(),
                    inbound.from_peer
                );
                return;
            }
        };
        trace!(
            "<{}> epoch {}: {} {} from {} via {}",
            self.ctx.group_id(),
            message.epoch,
            message.kind,
            message.payload.name(),
            message.sender,
            inbound.from_peer
        );

        let kind = message.kind;
        let epoch = message.epoch;
        let result = match kind {
            ProposalKind::Trx => self.trx.handle_message(message),
            ProposalKind::ProducerSync => self.psync.handle_message(message),
        };
        match result {
            Ok(outbound) => self.send(kind, outbound),
            Err(err) => err.class().log(self.ctx.group_id(), epoch, &err),
        }
        self.after_step();
    }

    fn on_command(&mut self, cmd: GroupCmd) {
        trace!("<{}> command {cmd}", self.ctx.group_id());
        match cmd {
            GroupCmd::AddTrx(trx, reply) => {
                let result = self
                    .trx
                    .handler_mut()
                    .add_trx(trx)
                    .map_err(GroupError::from);
                let accepted = result.is_ok();
                if reply.send(result).is_err() {
                    debug!("<{}> add_trx caller went away", self.ctx.group_id());
                }
                if accepted {
                    self.propose_trx();
                }
            }
            GroupCmd::RequestSync => {
                self.psync.handler_mut().request();
                match self.psync.propose_next() {
                    Ok(outbound) => self.send(ProposalKind::ProducerSync, outbound),
                    Err(err) => self.log_propose_error(ProposalKind::ProducerSync, err),
                }
            }
            GroupCmd::RetryStalled => {
                let outbound = self.trx.retry_stalled();
                self.send(ProposalKind::Trx, outbound);
            }
            GroupCmd::Status(reply) => {
                let status = self.status();
                if reply.send(status).is_err() {
                    debug!("<{}> status caller went away", self.ctx.group_id());
                }
            }
        }
        self.after_step();
    }

    fn propose_trx(&mut self) {
        match self.trx.propose_next() {
            Ok(outbound) => self.send(ProposalKind::Trx, outbound),
            Err(err) => self.log_propose_error(ProposalKind::Trx, err),
        }
    }

    fn log_propose_error(&self, kind: ProposalKind, err: BftError) {
        error!("<{}> {kind} propose failed: {err}", self.ctx.group_id());
    }

    fn status(&self) -> Result<GroupStatus, GroupError> {
        let pending_trxs = self
            .trx
            .handler()
            .buffer()
            .len()
            .map_err(|err| GroupError::Trx(err.into()))?;
        Ok(GroupStatus {
            group_id: self.ctx.group_id().to_string(),
            finalized_epoch: self.trx.finalized_epoch(),
            open_epochs: self.trx.open_epochs(),
            stalled: self.trx.is_stalled(),
            pending_trxs,
            sync_round: self.psync.finalized_epoch(),
            last_sync: self.psync.handler().last_report().cloned(),
        })
    }

    fn send(&mut self, kind: ProposalKind, outbound: Vec<Outbound>) {
        for out in &outbound {
            dispatch(self.transport.as_ref(), self.ctx.group_id(), out);
        }
        let Some(interval) = self.ctx.config.resend_interval() else {
            return;
        };

        let mut by_epoch: BTreeMap<u64, Vec<Outbound>> = BTreeMap::new();
        for out in outbound {
            by_epoch.entry(out.message().epoch).or_default().push(out);
        }
        for (epoch, messages) in by_epoch {
            let repeater = self.repeaters.entry((kind, epoch)).or_insert_with(|| {
                RepeatSender::start(
                    self.transport.clone(),
                    self.ctx.group_id().to_string(),
                    format!("{kind} epoch {epoch}"),
                    interval,
                )
            });
            repeater.push(messages);
        }
    }

    /// Keeps the sync status current and stops re-sending for finalized epochs.
    fn after_step(&mut self) {
        let trx_epoch = self.trx.finalized_epoch();
        self.psync.handler_mut().set_local_epoch(trx_epoch);

        let psync_round = self.psync.finalized_epoch();
        self.repeaters.retain(|(kind, epoch), repeater| {
            let finalized = match kind {
                ProposalKind::Trx => trx_epoch,
                ProposalKind::ProducerSync => psync_round,
            };
            let keep = *epoch > finalized;
            if !keep {
                repeater.cancel();
            }
            keep
        });
    }
}
