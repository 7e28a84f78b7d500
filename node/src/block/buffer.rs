use std::sync::Arc;

use log::{debug, trace, warn};
use thiserror::Error;

use crate::block::types::trx::Trx;
use crate::storage::{BufferStore, StorageError};
use crate::utilities::encoding::{decode, encode};

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Trx {0} is already pending")]
    DuplicateId(String),
    #[error("Trx {0} is not pending")]
    NotFound(String),
    #[error("Storage: {0}")]
    Storage(StorageError),
    #[error("Encoding: {0}")]
    Encoding(#[from] anyhow::Error),
}

impl From<StorageError> for BufferError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::AlreadyExists(id) => BufferError::DuplicateId(id),
            StorageError::NotFound(id) => BufferError::NotFound(id),
            other => BufferError::Storage(other),
        }
    }
}

/// Pending trxs of one group, not yet part of any agreed bundle.
pub struct TrxBuffer {
    queue_id: String,
    store: Arc<dyn BufferStore>,
}

impl TrxBuffer {
    pub fn new(group_id: &str, store: Arc<dyn BufferStore>) -> Self {
        Self {
            queue_id: format!("trx_buffer_{group_id}"),
            store,
        }
    }

    pub fn push(&self, trx: &Trx) -> Result<(), BufferError> {
        debug!("Adding trx to buffer: {}", trx.trx_id);
        self.store
            .push(&self.queue_id, &trx.trx_id, encode(trx)?)?;
        Ok(())
    }

    /// Fails with `NotFound` when absent, callers that need idempotence check `contains` first.
    pub fn delete(&self, trx_id: &str) -> Result<(), BufferError> {
        trace!("Removing trx from buffer: {}", trx_id);
        self.store.delete(&self.queue_id, trx_id)?;
        Ok(())
    }

    pub fn contains(&self, trx_id: &str) -> Result<bool, BufferError> {
        Ok(self.store.contains(&self.queue_id, trx_id)?)
    }

    /// Up to `n` pending trxs, in no particular order.
    pub fn sample(&self, n: usize) -> Result<Vec<Trx>, BufferError> {
        let items = self.store.sample(&self.queue_id, n)?;
        let mut trxs = Vec::with_capacity(items.len());
        for item in items {
            match decode::<Trx>(&item) {
                Ok(trx) => trxs.push(trx),
                Err(err) => warn!("Skipping undecodable buffer item in {}: {err}", self.queue_id),
            }
        }
        Ok(trxs)
    }

    pub fn len(&self) -> Result<usize, BufferError> {
        Ok(self.store.len(&self.queue_id)?)
    }

    pub fn is_empty(&self) -> Result<bool, BufferError> {
        Ok(self.len()? == 0)
    }
}
