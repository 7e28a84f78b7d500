use std::collections::HashMap;

use log::{debug, info};
use parking_lot::RwLock;
use thiserror::Error;

use crate::core::handle::{GroupError, GroupHandle};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown group {0}")]
    UnknownGroup(String),
    #[error("Group {0} is already registered")]
    AlreadyRegistered(String),
    #[error(transparent)]
    Group(#[from] GroupError),
}

/// Running groups of this node, the transport's way in.
#[derive(Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, GroupHandle>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: GroupHandle) -> Result<(), RegistryError> {
        let mut groups = self.groups.write();
        let group_id = handle.group_id().to_string();
        if groups.get(&group_id).map_or(false, |h| !h.is_shut_down()) {
            return Err(RegistryError::AlreadyRegistered(group_id));
        }
        info!("<{group_id}> registered");
        groups.insert(group_id, handle);
        Ok(())
    }

    pub fn get(&self, group_id: &str) -> Option<GroupHandle> {
        self.groups.read().get(group_id).cloned()
    }

    pub fn group_ids(&self) -> Vec<String> {
        self.groups.read().keys().cloned().collect()
    }

    /// Shuts the group down and forgets it.
    pub fn remove(&self, group_id: &str) -> Option<GroupHandle> {
        let handle = self.groups.write().remove(group_id)?;
        handle.shutdown();
        info!("<{group_id}> removed");
        Some(handle)
    }

    pub fn shutdown_all(&self) {
        for (_, handle) in self.groups.write().drain() {
            handle.shutdown();
        }
    }

    /// Called by the transport for every received consensus message. Never blocks.
    pub fn handle_inbound(
        &self,
        group_id: &str,
        bytes: Vec<u8>,
        from_peer: &str,
    ) -> Result<(), RegistryError> {
        let handle = self.get(group_id).ok_or_else(|| {
            debug!("Message for unknown group {group_id} from {from_peer}");
            RegistryError::UnknownGroup(group_id.to_string())
        })?;
        handle.try_inbound(bytes, from_peer)?;
        Ok(())
    }
}
