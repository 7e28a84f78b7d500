use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::block::types::block::Block;
use crate::storage::{BufferStore, ChainStore, StorageError};
use crate::utilities::PublicKey;

/// Non persistent storage, used by tests and single process setups.
#[derive(Default)]
pub struct MemoryStore {
    queues: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
    blocks: RwLock<HashMap<String, BTreeMap<u64, Block>>>,
    producers: RwLock<HashMap<String, Vec<PublicKey>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BufferStore for MemoryStore {
    fn push(&self, queue_id: &str, item_id: &str, item: Vec<u8>) -> Result<(), StorageError> {
        let mut queues = self.queues.write();
        let queue = queues.entry(queue_id.to_string()).or_default();
        if queue.contains_key(item_id) {
            return Err(StorageError::AlreadyExists(item_id.to_string()));
        }
        queue.insert(item_id.to_string(), item);
        Ok(())
    }

    fn delete(&self, queue_id: &str, item_id: &str) -> Result<(), StorageError> {
        self.queues
            .write()
            .get_mut(queue_id)
            .and_then(|queue| queue.remove(item_id))
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(item_id.to_string()))
    }

    fn contains(&self, queue_id: &str, item_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .queues
            .read()
            .get(queue_id)
            .map_or(false, |queue| queue.contains_key(item_id)))
    }

    fn sample(&self, queue_id: &str, n: usize) -> Result<Vec<Vec<u8>>, StorageError> {
        Ok(self
            .queues
            .read()
            .get(queue_id)
            .map(|queue| queue.values().take(n).cloned().collect())
            .unwrap_or_default())
    }

    fn len(&self, queue_id: &str) -> Result<usize, StorageError> {
        Ok(self.queues.read().get(queue_id).map_or(0, HashMap::len))
    }
}

impl ChainStore for MemoryStore {
    fn get_block(&self, group_id: &str, epoch: u64) -> Result<Option<Block>, StorageError> {
        Ok(self
            .blocks
            .read()
            .get(group_id)
            .and_then(|chain| chain.get(&epoch))
            .cloned())
    }

    fn add_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut blocks = self.blocks.write();
        let chain = blocks.entry(block.header.group_id.clone()).or_default();
        if chain.contains_key(&block.header.epoch) {
            return Err(StorageError::AlreadyExists(format!(
                "{}/{}",
                block.header.group_id, block.header.epoch
            )));
        }
        chain.insert(block.header.epoch, block.clone());
        Ok(())
    }

    fn last_block(&self, group_id: &str) -> Result<Option<Block>, StorageError> {
        Ok(self
            .blocks
            .read()
            .get(group_id)
            .and_then(|chain| chain.values().next_back())
            .cloned())
    }

    fn get_producers(&self, group_id: &str) -> Result<Vec<PublicKey>, StorageError> {
        Ok(self
            .producers
            .read()
            .get(group_id)
            .cloned()
            .unwrap_or_default())
    }

    fn set_producers(&self, group_id: &str, producers: Vec<PublicKey>) -> Result<(), StorageError> {
        self.producers
            .write()
            .insert(group_id.to_string(), producers);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;
    use crate::utilities::Ed25519Keypair;

    #[test]
    fn test_buffer_operations() {
        let store = MemoryStore::new();
        store.push("q", "a", vec![1]).unwrap();
        store.push("q", "b", vec![2]).unwrap();
        store.push("other", "a", vec![3]).unwrap();

        assert_matches!(store.push("q", "a", vec![9]), Err(StorageError::AlreadyExists(_)));
        assert_eq!(store.len("q").unwrap(), 2);
        assert_eq!(store.sample("q", 1).unwrap().len(), 1);
        assert_eq!(store.sample("q", 10).unwrap().len(), 2);
        assert!(store.sample("missing", 10).unwrap().is_empty());

        store.delete("q", "a").unwrap();
        assert!(!store.contains("q", "a").unwrap());
        assert!(store.contains("other", "a").unwrap());
        assert_matches!(store.delete("q", "a"), Err(StorageError::NotFound(_)));
    }

    #[test]
    fn test_chain_operations() {
        let store = MemoryStore::new();
        let keypair = Ed25519Keypair::generate();
        assert!(store.last_block("g").unwrap().is_none());

        let genesis = Block::new_genesis("g", &keypair).unwrap();
        let next = Block::new(&genesis, vec![], &keypair).unwrap();
        store.add_block(&genesis).unwrap();
        store.add_block(&next).unwrap();
        assert_matches!(store.add_block(&next), Err(StorageError::AlreadyExists(_)));

        assert_eq!(store.get_block("g", 0).unwrap(), Some(genesis));
        assert_eq!(store.last_block("g").unwrap(), Some(next));
        assert!(store.get_block("other", 0).unwrap().is_none());
    }
}
