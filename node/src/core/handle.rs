use std::fmt::Display;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::block::Trx;
use crate::consensus::psync::SyncReport;
use crate::consensus::trx::TrxError;

#[derive(Error, Debug)]
pub enum GroupError {
    #[error("Trx rejected: {0}")]
    Trx(#[from] TrxError),
    #[error("Inbound queue of group {0} is full")]
    Backpressure(String),
    #[error("Group {0} is shut down")]
    Closed(String),
}

/// Snapshot of one group's progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStatus {
    pub group_id: String,
    pub finalized_epoch: u64,
    pub open_epochs: Vec<u64>,
    pub stalled: bool,
    pub pending_trxs: usize,
    pub sync_round: u64,
    pub last_sync: Option<SyncReport>,
}

#[derive(Debug)]
pub(crate) enum GroupCmd {
    AddTrx(Trx, oneshot::Sender<Result<(), GroupError>>),
    RequestSync,
    RetryStalled,
    Status(oneshot::Sender<Result<GroupStatus, GroupError>>),
}

impl Display for GroupCmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupCmd::AddTrx(trx, _) => write!(f, "AddTrx({})", trx.trx_id),
            GroupCmd::RequestSync => write!(f, "RequestSync"),
            GroupCmd::RetryStalled => write!(f, "RetryStalled"),
            GroupCmd::Status(_) => write!(f, "Status"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Inbound {
    pub(crate) bytes: Vec<u8>,
    pub(crate) from_peer: String,
}

/// Local entry points into one running group.
#[derive(Clone)]
pub struct GroupHandle {
    group_id: String,
    pub(crate) inbound: Sender<Inbound>,
    pub(crate) commands: Sender<GroupCmd>,
    pub(crate) shutdown: CancellationToken,
}

impl GroupHandle {
    pub(crate) fn new(
        group_id: String,
        inbound: Sender<Inbound>,
        commands: Sender<GroupCmd>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            group_id,
            inbound,
            commands,
            shutdown,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Buffers `trx` and proposes it in the next open epoch.
    pub async fn add_trx(&self, trx: Trx) -> Result<(), GroupError> {
        log::trace!("<{}> add_trx({})", self.group_id, trx.trx_id);
        self.send_and_wait_response(|tx| GroupCmd::AddTrx(trx, tx))
            .await
    }

    /// Starts a producer sync round.
    pub async fn request_sync(&self) -> Result<(), GroupError> {
        self.send(GroupCmd::RequestSync).await
    }

    /// Applies a stalled epoch again, after its parent block was restored.
    pub async fn retry_stalled(&self) -> Result<(), GroupError> {
        self.send(GroupCmd::RetryStalled).await
    }

    pub async fn status(&self) -> Result<GroupStatus, GroupError> {
        self.send_and_wait_response(GroupCmd::Status).await
    }

    /// Queues an inbound consensus message without waiting.
    pub(crate) fn try_inbound(&self, bytes: Vec<u8>, from_peer: &str) -> Result<(), GroupError> {
        let inbound = Inbound {
            bytes,
            from_peer: from_peer.to_string(),
        };
        self.inbound.try_send(inbound).map_err(|err| match err {
            TrySendError::Full(_) => GroupError::Backpressure(self.group_id.clone()),
            TrySendError::Closed(_) => GroupError::Closed(self.group_id.clone()),
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn send(&self, cmd: GroupCmd) -> Result<(), GroupError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| GroupError::Closed(self.group_id.clone()))
    }

    async fn send_and_wait_response<F, R>(&self, f: F) -> Result<R, GroupError>
    where
        F: FnOnce(oneshot::Sender<Result<R, GroupError>>) -> GroupCmd,
        R: Send + 'static,
    {
        let (tx, rcv) = oneshot::channel();
        self.send(f(tx)).await?;
        rcv.await.map_err(|err| {
            log::error!("<{}> no response from group runner: {err:?}", self.group_id);
            GroupError::Closed(self.group_id.clone())
        })?
    }
}
