//! Transaction agreement: proposes batches from the trx buffer and turns agreed bundles into
//! blocks.

use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use log::{debug, info, trace, warn};
use lru::LruCache;
use thiserror::Error;

use crate::block::{BlockSink, BufferError, Trx, TrxBuffer, TrxBundle};
use crate::broadcast::ProposalKind;
use crate::consensus::bft::{AgreementHandler, BftError};
use crate::consensus::GroupContext;
use crate::logging::pretty_json;
use crate::utilities::encoding::{decode, encode};
use crate::utilities::PublicKey;

/// Upper bound for the encoded trxs of one proposal.
pub const TRXS_TOTAL_SIZE: usize = 900 * 1024;

#[derive(Error, Debug)]
pub enum TrxError {
    #[error("Trx {trx_id} belongs to group {group_id}")]
    WrongGroup { trx_id: String, group_id: String },
    #[error("Trx {0} has an invalid signature")]
    InvalidSignature(String),
    #[error("Trx {0} is already finalized")]
    AlreadyFinalized(String),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

pub(crate) struct TrxAgreement {
    ctx: Arc<GroupContext>,
    buffer: TrxBuffer,
    block_sink: Arc<dyn BlockSink>,
    finalized: LruCache<String, ()>,
}

impl TrxAgreement {
    pub(crate) fn new(
        ctx: Arc<GroupContext>,
        buffer: TrxBuffer,
        block_sink: Arc<dyn BlockSink>,
    ) -> Self {
        let cache_size =
            NonZeroUsize::new(ctx.config.finalized_cache_size()).unwrap_or(NonZeroUsize::MIN);
        TrxAgreement {
            ctx,
            buffer,
            block_sink,
            finalized: LruCache::new(cache_size),
        }
    }

    pub(crate) fn buffer(&self) -> &TrxBuffer {
        &self.buffer
    }

    /// Verifies and buffers a trx. The caller proposes afterwards.
    pub(crate) fn add_trx(&mut self, trx: Trx) -> Result<(), TrxError> {
        if trx.group_id != self.ctx.group_id() {
            return Err(TrxError::WrongGroup {
                trx_id: trx.trx_id,
                group_id: trx.group_id,
            });
        }
        if !trx.verify(self.ctx.signer.as_ref()) {
            return Err(TrxError::InvalidSignature(trx.trx_id));
        }
        if self.finalized.contains(&trx.trx_id) {
            return Err(TrxError::AlreadyFinalized(trx.trx_id));
        }
        self.buffer.push(&trx)?;
        debug!("<{}> added trx {trx}", self.ctx.group_id());
        Ok(())
    }

    /// Up to `BatchSize` buffered trxs whose encoded size stays within [`TRXS_TOTAL_SIZE`].
    fn next_batch(&self) -> Result<Vec<Trx>, BftError> {
        let sampled = self.buffer.sample(self.ctx.config.batch_size())?;
        let mut total = 0;
        let mut batch = Vec::with_capacity(sampled.len());
        for trx in sampled {
            let size = encode(&trx)?.len();
            if total + size > TRXS_TOTAL_SIZE {
                trace!(
                    "<{}> batch size cap reached at {} trxs",
                    self.ctx.group_id(),
                    batch.len()
                );
                break;
            }
            total += size;
            batch.push(trx);
        }
        Ok(batch)
    }

    /// Decodes every agreed bundle and keeps the first valid copy of each trx id.
    fn collect_agreed(&self, epoch: u64, results: &BTreeMap<PublicKey, Vec<u8>>) -> Vec<Trx> {
        let mut seen = HashSet::new();
        let mut trxs = vec![];
        for (proposer, value) in results {
            let bundle = match decode::<TrxBundle>(value) {
                Ok(bundle) => bundle,
                Err(err) => {
                    warn!(
                        "<{}> epoch {epoch}: undecodable bundle from {proposer}: {err}",
                        self.ctx.group_id()
                    );
                    continue;
                }
            };
            for trx in bundle.trxs {
                if trx.group_id != self.ctx.group_id() || !trx.verify(self.ctx.signer.as_ref()) {
                    warn!(
                        "<{}> epoch {epoch}: dropping invalid trx {} from {proposer}",
                        self.ctx.group_id(),
                        trx.trx_id
                    );
                    continue;
                }
                if seen.insert(trx.trx_id.clone()) {
                    trxs.push(trx);
                }
            }
        }
        trxs
    }
}

/// Deterministic block order: trxs grouped by sender, senders ascending with the owner last,
/// each sender's trxs by ascending timestamp and then id.
pub fn order_trxs(trxs: Vec<Trx>, owner: &PublicKey) -> Vec<Trx> {
    let mut by_sender: BTreeMap<PublicKey, Vec<Trx>> = BTreeMap::new();
    for trx in trxs {
        by_sender.entry(trx.sender_pubkey.clone()).or_default().push(trx);
    }
    for sender_trxs in by_sender.values_mut() {
        sender_trxs.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.trx_id.cmp(&b.trx_id))
        });
    }

    let owner_trxs = by_sender.remove(owner).unwrap_or_default();
    by_sender
        .into_values()
        .flatten()
        .chain(owner_trxs)
        .collect()
}

impl AgreementHandler for TrxAgreement {
    fn kind(&self) -> ProposalKind {
        ProposalKind::Trx
    }

    fn next_proposal(&mut self, epoch: u64, _joining: bool) -> Result<Option<Vec<u8>>, BftError> {
        let batch = self.next_batch()?;
        if batch.is_empty() {
            trace!("<{}> epoch {epoch}: nothing to propose", self.ctx.group_id());
            return Ok(None);
        }
        debug!(
            "<{}> epoch {epoch}: proposing {} trxs",
            self.ctx.group_id(),
            batch.len()
        );
        Ok(Some(encode(TrxBundle::new(batch))?))
    }

    fn on_agreement(
        &mut self,
        epoch: u64,
        results: &BTreeMap<PublicKey, Vec<u8>>,
    ) -> Result<(), BftError> {
        let trxs = self.collect_agreed(epoch, results);
        let ordered = order_trxs(trxs, self.ctx.config.owner_pubkey());
        let ids: Vec<String> = ordered.iter().map(|trx| trx.trx_id.clone()).collect();

        let block = self
            .block_sink
            .build_block(self.ctx.group_id(), epoch, ordered)?;
        info!(
            "<{}> epoch {epoch}: block {} with {} trxs",
            self.ctx.group_id(),
            block.hash,
            ids.len()
        );
        trace!("<{}> block header {}", self.ctx.group_id(), pretty_json(&block.header));

        for trx_id in ids {
            match self.buffer.contains(&trx_id) {
                Ok(true) => {
                    if let Err(err) = self.buffer.delete(&trx_id) {
                        warn!(
                            "<{}> removing packaged trx {trx_id}: {err}",
                            self.ctx.group_id()
                        );
                    }
                }
                Ok(false) => {}
                Err(err) => warn!(
                    "<{}> checking packaged trx {trx_id}: {err}",
                    self.ctx.group_id()
                ),
            }
            self.finalized.put(trx_id, ());
        }
        Ok(())
    }
}
