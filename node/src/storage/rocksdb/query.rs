use std::sync::Arc;

use log::trace;
use rocksdb::TransactionDB;

use crate::block::types::block::Block;
use crate::storage::rocksdb::{
    backend, block_key, buffer_key, buffer_prefix, last_block_key, producers_key,
};
use crate::storage::StorageError;
use crate::utilities::PublicKey;

pub struct DbQuery {
    database: Arc<TransactionDB>,
}

impl DbQuery {
    pub fn new(db: Arc<TransactionDB>) -> DbQuery {
        DbQuery { database: db }
    }

    pub(crate) fn contains_item(
        &self,
        queue_id: &str,
        item_id: &str,
    ) -> Result<bool, StorageError> {
        let item = self
            .database
            .get(buffer_key(queue_id, item_id))
            .map_err(backend)?;
        Ok(item.is_some())
    }

    pub(crate) fn sample_items(
        &self,
        queue_id: &str,
        n: usize,
    ) -> Result<Vec<Vec<u8>>, StorageError> {
        let prefix = buffer_prefix(queue_id);
        let mut items = Vec::with_capacity(n);
        for entry in self.database.prefix_iterator(prefix.as_bytes()) {
            if items.len() >= n {
                break;
            }
            let (key, value) = entry.map_err(backend)?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            items.push(value.to_vec());
        }
        Ok(items)
    }

    pub(crate) fn count_items(&self, queue_id: &str) -> Result<usize, StorageError> {
        let prefix = buffer_prefix(queue_id);
        let mut count = 0;
        for entry in self.database.prefix_iterator(prefix.as_bytes()) {
            let (key, _) = entry.map_err(backend)?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    pub(crate) fn get_block(
        &self,
        group_id: &str,
        epoch: u64,
    ) -> Result<Option<Block>, StorageError> {
        trace!("Getting block of {group_id} at epoch {epoch}");

        match self.database.get(block_key(group_id, epoch)).map_err(backend)? {
            Some(bytes) => {
                let block = serde_json::from_slice::<Block>(&bytes).map_err(backend)?;
                trace!("Found block: {}", block.header);
                Ok(Some(block))
            }
            None => {
                trace!("Didn't find block");
                Ok(None)
            }
        }
    }

    pub(crate) fn get_last_block(&self, group_id: &str) -> Result<Option<Block>, StorageError> {
        trace!("Getting last block of {group_id}");

        let last_epoch = self
            .database
            .get(last_block_key(group_id))
            .map_err(backend)?
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_slice()).ok())
            .map(u64::from_be_bytes);
        match last_epoch {
            Some(epoch) => self.get_block(group_id, epoch),
            None => Ok(None),
        }
    }

    pub(crate) fn get_producers(&self, group_id: &str) -> Result<Vec<PublicKey>, StorageError> {
        match self.database.get(producers_key(group_id)).map_err(backend)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(backend),
            None => Ok(vec![]),
        }
    }
}
