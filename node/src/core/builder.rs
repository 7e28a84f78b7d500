use std::collections::BTreeMap;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::mpsc::{channel, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::block::{BlockBuilder, BlockSink, TrxBuffer};
use crate::config::ConsensusConfig;
use crate::consensus::bft::Bft;
use crate::consensus::psync::{ProducerSync, SyncReport};
use crate::consensus::trx::TrxAgreement;
use crate::consensus::GroupContext;
use crate::core::handle::GroupHandle;
use crate::core::runner::GroupRunner;
use crate::network::TransportSink;
use crate::storage::{BufferStore, ChainStore};
use crate::utilities::Signer;

const INBOUND_QUEUE_SIZE: usize = 1000;
const COMMAND_QUEUE_SIZE: usize = 100;

/// Wires the collaborators of one group into a runner and its handle.
pub struct GroupBuilder {
    config: ConsensusConfig,
    signer: Arc<dyn Signer>,
    buffer_store: Arc<dyn BufferStore>,
    chain: Arc<dyn ChainStore>,
    transport: Arc<dyn TransportSink>,
    block_sink: Option<Arc<dyn BlockSink>>,
    sync_reports: Option<UnboundedSender<SyncReport>>,
}

impl GroupBuilder {
    pub fn new(
        config: ConsensusConfig,
        signer: Arc<dyn Signer>,
        buffer_store: Arc<dyn BufferStore>,
        chain: Arc<dyn ChainStore>,
        transport: Arc<dyn TransportSink>,
    ) -> Self {
        Self {
            config,
            signer,
            buffer_store,
            chain,
            transport,
            block_sink: None,
            sync_reports: None,
        }
    }

    /// Replaces the default [`BlockBuilder`].
    pub fn with_block_sink(mut self, block_sink: Arc<dyn BlockSink>) -> Self {
        self.block_sink = Some(block_sink);
        self
    }

    pub fn with_sync_reports(mut self, reports: UnboundedSender<SyncReport>) -> Self {
        self.sync_reports = Some(reports);
        self
    }

    /// Ensures the chain has a genesis block and resumes from its last finalized epoch.
    pub fn build(self) -> anyhow::Result<(GroupRunner, GroupHandle)> {
        let ctx = Arc::new(GroupContext::new(self.config, self.signer.clone())?);
        let group_id = ctx.group_id().to_string();

        let block_builder = Arc::new(BlockBuilder::new(
            self.chain.clone(),
            self.transport.clone(),
            self.signer,
        ));
        let last_block = block_builder.ensure_genesis(&group_id)?;
        let finalized = last_block.header.epoch;

        let stored = self.chain.get_producers(&group_id)?;
        if stored.is_empty() {
            self.chain.set_producers(&group_id, ctx.config.nodes().to_vec())?;
        } else if stored != ctx.config.nodes() {
            warn!("<{group_id}> stored producer set differs from the configured one, overwriting");
            self.chain.set_producers(&group_id, ctx.config.nodes().to_vec())?;
        }

        let block_sink = self
            .block_sink
            .unwrap_or_else(|| block_builder as Arc<dyn BlockSink>);
        let buffer = TrxBuffer::new(&group_id, self.buffer_store);
        let trx = Bft::new(
            ctx.clone(),
            TrxAgreement::new(ctx.clone(), buffer, block_sink),
            finalized,
        );
        let mut sync = ProducerSync::new(ctx.clone(), self.sync_reports);
        sync.set_local_epoch(finalized);
        let psync = Bft::new(ctx.clone(), sync, 0);

        let (inbound_snd, inbound_rcv) = channel(INBOUND_QUEUE_SIZE);
        let (commands_snd, commands_rcv) = channel(COMMAND_QUEUE_SIZE);
        let shutdown = CancellationToken::new();

        info!("<{group_id}> group built, resuming after epoch {finalized}");
        let handle = GroupHandle::new(group_id, inbound_snd, commands_snd, shutdown.clone());
        let runner = GroupRunner {
            ctx,
            trx,
            psync,
            transport: self.transport,
            inbound: inbound_rcv,
            commands: commands_rcv,
            shutdown,
            repeaters: BTreeMap::new(),
        };
        Ok((runner, handle))
    }

    /// Builds and spawns the runner on the current tokio runtime.
    pub fn start(self) -> anyhow::Result<(GroupHandle, JoinHandle<()>)> {
        let (runner, handle) = self.build()?;
        let join = tokio::spawn(runner.run());
        Ok((handle, join))
    }
}
