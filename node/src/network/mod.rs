//! Transport collaborator. The core hands it opaque bytes and never waits for delivery.

use log::warn;

use crate::broadcast::Outbound;
use crate::utilities::encoding::encode;
use crate::utilities::PublicKey;

pub(crate) mod repeat;

pub use repeat::RepeatSender;

pub trait TransportSink: Send + Sync {
    /// To every other producer of the group.
    fn broadcast(&self, group_id: &str, bytes: Vec<u8>) -> anyhow::Result<()>;

    fn send_to(&self, group_id: &str, peer: &PublicKey, bytes: Vec<u8>) -> anyhow::Result<()>;

    /// To the group's user channel.
    fn publish_block(&self, group_id: &str, bytes: Vec<u8>) -> anyhow::Result<()>;
}

/// Encodes and sends one outgoing consensus message. Failures are logged, not returned.
pub(crate) fn dispatch(transport: &dyn TransportSink, group_id: &str, outbound: &Outbound) {
    let bytes = match encode(outbound.message()) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("<{group_id}> failed to encode consensus message: {err}");
            return;
        }
    };
    let result = match outbound {
        Outbound::Broadcast(_) => transport.broadcast(group_id, bytes),
        Outbound::SendTo(peer, _) => transport.send_to(group_id, peer, bytes),
    };
    if let Err(err) = result {
        warn!("<{group_id}> failed to send consensus message: {err}");
    }
}

#[cfg(test)]
pub(crate) mod test {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Sent {
        Broadcast(Vec<u8>),
        SendTo(PublicKey, Vec<u8>),
        Block(Vec<u8>),
    }

    /// Remembers everything it was asked to send.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) sent: Mutex<Vec<Sent>>,
    }

    impl RecordingTransport {
        pub(crate) fn blocks(&self) -> Vec<Vec<u8>> {
            self.sent
                .lock()
                .iter()
                .filter_map(|s| match s {
                    Sent::Block(bytes) => Some(bytes.clone()),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn consensus_count(&self) -> usize {
            self.sent
                .lock()
                .iter()
                .filter(|s| !matches!(s, Sent::Block(_)))
                .count()
        }
    }

    impl TransportSink for RecordingTransport {
        fn broadcast(&self, _group_id: &str, bytes: Vec<u8>) -> anyhow::Result<()> {
            self.sent.lock().push(Sent::Broadcast(bytes));
            Ok(())
        }

        fn send_to(&self, _group_id: &str, peer: &PublicKey, bytes: Vec<u8>) -> anyhow::Result<()> {
            self.sent.lock().push(Sent::SendTo(peer.clone(), bytes));
            Ok(())
        }

        fn publish_block(&self, _group_id: &str, bytes: Vec<u8>) -> anyhow::Result<()> {
            self.sent.lock().push(Sent::Block(bytes));
            Ok(())
        }
    }
}
