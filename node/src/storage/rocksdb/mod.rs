use std::path::Path;
use std::sync::Arc;

use log::info;
use rocksdb::{TransactionDB, TransactionDBOptions};

use crate::block::types::block::Block;
use crate::storage::rocksdb::query::DbQuery;
use crate::storage::rocksdb::store::DbStore;
use crate::storage::{BufferStore, ChainStore, StorageError};
use crate::utilities::PublicKey;

pub(crate) mod query;
pub(crate) mod store;

const PREFIX_BUFFER: &str = "buffer";
const PREFIX_BLOCK: &str = "block";
const PREFIX_LAST_BLOCK: &str = "last_block";
const PREFIX_PRODUCERS: &str = "producers";

pub struct RocksDbStorage {
    pub(crate) db_store: DbStore,
    pub(crate) db_query: DbQuery,
}

impl RocksDbStorage {
    pub fn open<P: AsRef<Path>>(path: P, create_if_missing: bool) -> anyhow::Result<Self> {
        info!("Opening RocksDB database at {}", path.as_ref().display());

        let mut options = rocksdb::Options::default();
        options.create_if_missing(create_if_missing);

        let db = TransactionDB::open(&options, &TransactionDBOptions::default(), path.as_ref())?;
        let db = Arc::new(db);
        let storage = Self {
            db_store: DbStore::new(db.clone()),
            db_query: DbQuery::new(db),
        };

        info!("Opened RocksDB database at {}", path.as_ref().display());
        Ok(storage)
    }
}

impl BufferStore for RocksDbStorage {
    fn push(&self, queue_id: &str, item_id: &str, item: Vec<u8>) -> Result<(), StorageError> {
        self.db_store.push_item(queue_id, item_id, item)
    }

    fn delete(&self, queue_id: &str, item_id: &str) -> Result<(), StorageError> {
        self.db_store.delete_item(queue_id, item_id)
    }

    fn contains(&self, queue_id: &str, item_id: &str) -> Result<bool, StorageError> {
        self.db_query.contains_item(queue_id, item_id)
    }

    fn sample(&self, queue_id: &str, n: usize) -> Result<Vec<Vec<u8>>, StorageError> {
        self.db_query.sample_items(queue_id, n)
    }

    fn len(&self, queue_id: &str) -> Result<usize, StorageError> {
        self.db_query.count_items(queue_id)
    }
}

impl ChainStore for RocksDbStorage {
    fn get_block(&self, group_id: &str, epoch: u64) -> Result<Option<Block>, StorageError> {
        self.db_query.get_block(group_id, epoch)
    }

    fn add_block(&self, block: &Block) -> Result<(), StorageError> {
        self.db_store.store_block(block)
    }

    fn last_block(&self, group_id: &str) -> Result<Option<Block>, StorageError> {
        self.db_query.get_last_block(group_id)
    }

    fn get_producers(&self, group_id: &str) -> Result<Vec<PublicKey>, StorageError> {
        self.db_query.get_producers(group_id)
    }

    fn set_producers(&self, group_id: &str, producers: Vec<PublicKey>) -> Result<(), StorageError> {
        self.db_store.store_producers(group_id, &producers)
    }
}

fn buffer_prefix(queue_id: &str) -> String {
    format!("{PREFIX_BUFFER}:{queue_id}:")
}

fn buffer_key(queue_id: &str, item_id: &str) -> String {
    format!("{}{item_id}", buffer_prefix(queue_id))
}

// Zero padded so that keys sort by epoch.
fn block_key(group_id: &str, epoch: u64) -> String {
    format!("{PREFIX_BLOCK}:{group_id}:{epoch:020}")
}

fn last_block_key(group_id: &str) -> String {
    format!("{PREFIX_LAST_BLOCK}:{group_id}")
}

fn producers_key(group_id: &str) -> String {
    format!("{PREFIX_PRODUCERS}:{group_id}")
}

fn backend<E: std::error::Error + Send + Sync + 'static>(err: E) -> StorageError {
    StorageError::Backend(anyhow::Error::new(err))
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;
    use crate::utilities::Ed25519Keypair;

    #[test]
    fn test_buffer_and_chain() {
        let dir = tempfile::tempdir().unwrap();
        let storage = RocksDbStorage::open(dir.path(), true).unwrap();

        storage.push("q", "a", vec![1]).unwrap();
        storage.push("q", "b", vec![2]).unwrap();
        storage.push("qq", "c", vec![3]).unwrap();
        assert_matches!(storage.push("q", "a", vec![1]), Err(StorageError::AlreadyExists(_)));
        assert_eq!(storage.len("q").unwrap(), 2);
        assert_eq!(storage.sample("q", 5).unwrap().len(), 2);
        storage.delete("q", "a").unwrap();
        assert_matches!(storage.delete("q", "a"), Err(StorageError::NotFound(_)));
        assert!(storage.contains("q", "b").unwrap());

        let keypair = Ed25519Keypair::generate();
        let genesis = Block::new_genesis("g", &keypair).unwrap();
        let next = Block::new(&genesis, vec![], &keypair).unwrap();
        storage.add_block(&genesis).unwrap();
        storage.add_block(&next).unwrap();
        assert_matches!(storage.add_block(&next), Err(StorageError::AlreadyExists(_)));
        assert_eq!(storage.get_block("g", 0).unwrap(), Some(genesis));
        assert_eq!(storage.last_block("g").unwrap(), Some(next));

        storage
            .set_producers("g", vec![keypair.public_key()])
            .unwrap();
        assert_eq!(storage.get_producers("g").unwrap(), vec![keypair.public_key()]);
    }
}
