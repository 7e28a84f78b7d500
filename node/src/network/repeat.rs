use std::sync::Arc;
use std::time::Duration;

use log::trace;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::Outbound;
use crate::network::{dispatch, TransportSink};

/// Re-sends a growing set of messages every `interval` until cancelled.
///
/// Must be created inside a tokio runtime. Dropping the sender cancels it.
pub struct RepeatSender {
    messages: Arc<Mutex<Vec<Outbound>>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RepeatSender {
    pub fn start(
        transport: Arc<dyn TransportSink>,
        group_id: String,
        label: String,
        interval: Duration,
    ) -> Self {
        let messages: Arc<Mutex<Vec<Outbound>>> = Arc::new(Mutex::new(vec![]));
        let cancel = CancellationToken::new();

        let task_messages = messages.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately, the messages were just sent.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        trace!("<{group_id}> repeat sender {label} cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let pending = task_messages.lock().clone();
                        trace!("<{group_id}> {label}: re-sending {} messages", pending.len());
                        for outbound in &pending {
                            dispatch(transport.as_ref(), &group_id, outbound);
                        }
                    }
                }
            }
        });

        Self {
            messages,
            cancel,
            handle,
        }
    }

    pub fn push(&self, outbound: impl IntoIterator<Item = Outbound>) {
        self.messages.lock().extend(outbound);
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RepeatSender {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::broadcast::{ConsensusMessage, ProposalKind, RbcPayload, Ready};
    use crate::consensus::test::contexts;
    use crate::network::test::RecordingTransport;
    use crate::utilities::{HashType, Signature};

    #[tokio::test(start_paused = true)]
    async fn test_resends_until_cancelled() {
        let ctx = contexts(1).remove(0);
        let me = ctx.config.my_pubkey().clone();
        let ready = Ready {
            root_hash: HashType::default(),
            proposer: me.clone(),
            signer: me.clone(),
            signature: Signature::default(),
        };
        let message =
            ConsensusMessage::new(&ctx, ProposalKind::Trx, 1, me, RbcPayload::Ready(ready))
                .unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let sender = RepeatSender::start(
            transport.clone(),
            "g".to_string(),
            "trx epoch 1".to_string(),
            Duration::from_millis(100),
        );
        sender.push(vec![Outbound::Broadcast(message)]);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(transport.consensus_count(), 3);

        sender.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sender.is_finished());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(transport.consensus_count(), 3);
    }
}
