//! Storage collaborators of the consensus core.
//!
//! The core only needs a keyed pending-item buffer and a per-group chain of blocks. Both must be
//! safe to share between groups.

use thiserror::Error;

use crate::block::types::block::Block;
use crate::utilities::PublicKey;

pub(crate) mod memory;
#[cfg(feature = "rocksdb_storage")]
pub(crate) mod rocksdb;

pub use memory::MemoryStore;
#[cfg(feature = "rocksdb_storage")]
pub use self::rocksdb::RocksDbStorage;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item {0} already exists")]
    AlreadyExists(String),
    #[error("Item {0} not found")]
    NotFound(String),
    #[error("Storage backend: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Pending items keyed by `(queue_id, item_id)`.
pub trait BufferStore: Send + Sync {
    fn push(&self, queue_id: &str, item_id: &str, item: Vec<u8>) -> Result<(), StorageError>;

    fn delete(&self, queue_id: &str, item_id: &str) -> Result<(), StorageError>;

    fn contains(&self, queue_id: &str, item_id: &str) -> Result<bool, StorageError>;

    /// Up to `n` items, in no particular order.
    fn sample(&self, queue_id: &str, n: usize) -> Result<Vec<Vec<u8>>, StorageError>;

    fn len(&self, queue_id: &str) -> Result<usize, StorageError>;
}

pub trait ChainStore: Send + Sync {
    fn get_block(&self, group_id: &str, epoch: u64) -> Result<Option<Block>, StorageError>;

    fn add_block(&self, block: &Block) -> Result<(), StorageError>;

    fn last_block(&self, group_id: &str) -> Result<Option<Block>, StorageError>;

    fn get_producers(&self, group_id: &str) -> Result<Vec<PublicKey>, StorageError>;

    fn set_producers(&self, group_id: &str, producers: Vec<PublicKey>) -> Result<(), StorageError>;
}
