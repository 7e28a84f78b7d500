use std::sync::Arc;

use rocksdb::TransactionDB;

use crate::block::types::block::Block;
use crate::storage::rocksdb::{backend, block_key, buffer_key, last_block_key, producers_key};
use crate::storage::StorageError;
use crate::utilities::PublicKey;

pub struct DbStore {
    connection: Arc<TransactionDB>,
}

impl DbStore {
    pub fn new(db: Arc<TransactionDB>) -> DbStore {
        DbStore { connection: db }
    }

    pub(crate) fn push_item(
        &self,
        queue_id: &str,
        item_id: &str,
        item: Vec<u8>,
    ) -> Result<(), StorageError> {
        let key = buffer_key(queue_id, item_id);
        log::trace!("Pushing buffer item: {}", key);

        let txn = self.connection.transaction();
        if txn.get_for_update(&key, true).map_err(backend)?.is_some() {
            return Err(StorageError::AlreadyExists(item_id.to_string()));
        }
        txn.put(&key, item).map_err(backend)?;
        txn.commit().map_err(backend)
    }

    pub(crate) fn delete_item(&self, queue_id: &str, item_id: &str) -> Result<(), StorageError> {
        let key = buffer_key(queue_id, item_id);
        log::trace!("Deleting buffer item: {}", key);

        let txn = self.connection.transaction();
        if txn.get_for_update(&key, true).map_err(backend)?.is_none() {
            return Err(StorageError::NotFound(item_id.to_string()));
        }
        txn.delete(&key).map_err(backend)?;
        txn.commit().map_err(backend)
    }

    pub(crate) fn store_block(&self, block: &Block) -> Result<(), StorageError> {
        log::debug!("Storing block: {}", block.header);
        let group_id = &block.header.group_id;
        let key = block_key(group_id, block.header.epoch);

        let txn = self.connection.transaction();
        // One block per epoch
        if txn.get_for_update(&key, true).map_err(backend)?.is_some() {
            return Err(StorageError::AlreadyExists(key));
        }
        let block_bytes = serde_json::to_vec(block).map_err(backend)?;
        txn.put(&key, block_bytes).map_err(backend)?;

        let last_key = last_block_key(group_id);
        let last_epoch = txn
            .get_for_update(&last_key, true)
            .map_err(backend)?
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_slice()).ok())
            .map(u64::from_be_bytes);
        if last_epoch.map_or(true, |last| last < block.header.epoch) {
            txn.put(&last_key, block.header.epoch.to_be_bytes())
                .map_err(backend)?;
        }
        txn.commit().map_err(backend)
    }

    pub(crate) fn store_producers(
        &self,
        group_id: &str,
        producers: &[PublicKey],
    ) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(producers).map_err(backend)?;
        self.connection
            .put(producers_key(group_id), bytes)
            .map_err(backend)
    }
}
