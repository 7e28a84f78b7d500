use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;

use crate::block::types::block::Block;
use crate::block::types::trx::Trx;
use crate::network::TransportSink;
use crate::storage::{ChainStore, StorageError};
use crate::utilities::encoding::encode;
use crate::utilities::Signer;

#[derive(Error, Debug)]
pub enum BlockBuildError {
    #[error("Parent block of epoch {epoch} not found in group {group_id}")]
    ParentNotFound { group_id: String, epoch: u64 },
    #[error("Storage: {0}")]
    Storage(#[from] StorageError),
    #[error("Block: {0}")]
    Block(#[from] anyhow::Error),
}

/// Turns an agreed, ordered list of trxs into the block of `epoch`.
pub trait BlockSink: Send + Sync {
    fn build_block(&self, group_id: &str, epoch: u64, trxs: Vec<Trx>)
        -> Result<Block, BlockBuildError>;
}

/// Default block sink: chains onto the stored parent, signs, stores and publishes.
pub struct BlockBuilder {
    chain: Arc<dyn ChainStore>,
    transport: Arc<dyn TransportSink>,
    signer: Arc<dyn Signer>,
}

impl BlockBuilder {
    pub fn new(
        chain: Arc<dyn ChainStore>,
        transport: Arc<dyn TransportSink>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        Self {
            chain,
            transport,
            signer,
        }
    }

    /// Stores the epoch 0 block if the group has no chain yet. Returns the last block.
    pub fn ensure_genesis(&self, group_id: &str) -> Result<Block, BlockBuildError> {
        if let Some(last) = self.chain.last_block(group_id)? {
            return Ok(last);
        }
        let genesis = Block::new_genesis(group_id, self.signer.as_ref())?;
        info!("<{group_id}> created genesis block {}", genesis.hash);
        self.chain.add_block(&genesis)?;
        Ok(genesis)
    }
}

impl BlockSink for BlockBuilder {
    fn build_block(
        &self,
        group_id: &str,
        epoch: u64,
        trxs: Vec<Trx>,
    ) -> Result<Block, BlockBuildError> {
        let parent_epoch = epoch.saturating_sub(1);
        let parent = self.chain.get_block(group_id, parent_epoch)?.ok_or_else(|| {
            BlockBuildError::ParentNotFound {
                group_id: group_id.to_string(),
                epoch: parent_epoch,
            }
        })?;

        let block = Block::new(&parent, trxs, self.signer.as_ref())?;
        debug!("<{group_id}> built block: {block}");
        self.chain.add_block(&block)?;

        match encode(&block) {
            Ok(bytes) => {
                if let Err(err) = self.transport.publish_block(group_id, bytes) {
                    warn!("<{group_id}> publishing block of epoch {epoch} failed: {err}");
                }
            }
            Err(err) => warn!("<{group_id}> encoding block of epoch {epoch} failed: {err}"),
        }
        Ok(block)
    }
}
