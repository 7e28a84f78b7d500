//! Permissioned BFT ordering of group transactions.
//!
//! Every epoch each producer erasure codes a batch of pending trxs and reliably broadcasts it. The
//! epoch is agreed once `N - f` broadcasts have been delivered and the union of their trxs, in a
//! deterministic order, becomes the epoch's block.

pub use crate::block::{Block, BlockBuilder, BlockHeader, BlockSink, Trx, TrxBundle};
pub use crate::broadcast::{ConsensusMessage, ProposalKind};
pub use crate::config::{ConfigError, ConsensusConfig, Settings};
pub use crate::consensus::psync::{SyncReport, SyncStatus};
pub use crate::consensus::trx::{order_trxs, TrxError, TRXS_TOTAL_SIZE};
pub use crate::consensus::{ErrorClass, GroupContext};
pub use crate::core::{GroupBuilder, GroupError, GroupHandle, GroupRegistry, GroupStatus};
pub use crate::network::TransportSink;
pub use crate::storage::{BufferStore, ChainStore, MemoryStore, StorageError};
pub use crate::utilities::{Ed25519Keypair, PublicKey, Signature, Signer};

pub mod block;
pub mod broadcast;
pub mod coding;
pub mod config;
pub mod consensus;
pub mod core;
pub mod logging;
pub mod network;
pub mod storage;
pub mod utilities;
