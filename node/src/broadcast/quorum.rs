use log::trace;

use crate::config::ConsensusConfig;
use crate::utilities::HashType;

pub(crate) struct RbcQuorum {
    pub(crate) cluster_size: usize,
    pub(crate) max_faulty_nodes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RbcAction {
    Ready,
    Deliver,
    Ignore,
}

impl RbcAction {
    pub(crate) fn is_ready(&self) -> bool {
        matches!(self, RbcAction::Ready)
    }

    pub(crate) fn is_deliver(&self) -> bool {
        matches!(self, RbcAction::Deliver)
    }
}

impl RbcQuorum {
    pub(crate) fn new(config: &ConsensusConfig) -> Self {
        Self {
            cluster_size: config.n(),
            max_faulty_nodes: config.f(),
        }
    }

    fn echo_threshold(&self) -> usize {
        self.cluster_size - self.max_faulty_nodes
    }

    pub(crate) fn decode_threshold(&self) -> usize {
        self.cluster_size - 2 * self.max_faulty_nodes
    }

    fn amplify_threshold(&self) -> usize {
        self.max_faulty_nodes + 1
    }

    fn deliver_threshold(&self) -> usize {
        2 * self.max_faulty_nodes + 1
    }

    /// n-f echoes are enough to send READY, once.
    pub(crate) fn check_echo(&self, root: &HashType, echoes: usize, ready_sent: bool) -> RbcAction {
        if ready_sent {
            return RbcAction::Ignore;
        }
        if echoes >= self.echo_threshold() {
            trace!(
                "Echo threshold reached: Echoed:{} / Threshold:{} for root:{}",
                echoes,
                self.echo_threshold(),
                root
            );
            RbcAction::Ready
        } else {
            trace!(
                "Echo threshold not reached: Echoed:{} / Threshold:{} for root:{}",
                echoes,
                self.echo_threshold(),
                root
            );
            RbcAction::Ignore
        }
    }

    /// f+1 readys are enough to send our own READY. 2f+1 readys together with n-2f echoes are
    /// enough to deliver.
    pub(crate) fn check_ready(
        &self,
        root: &HashType,
        readys: usize,
        echoes: usize,
        ready_sent: bool,
    ) -> RbcAction {
        if !ready_sent && readys >= self.amplify_threshold() {
            trace!(
                "Ready send threshold reached: Readys:{} / Threshold:{} for root:{}",
                readys,
                self.amplify_threshold(),
                root
            );
            return RbcAction::Ready;
        }

        if readys >= self.deliver_threshold() && echoes >= self.decode_threshold() {
            trace!(
                "Deliver threshold reached: Readys:{} Echoes:{} for root:{}",
                readys,
                echoes,
                root
            );
            return RbcAction::Deliver;
        }

        trace!(
            "Ready threshold not reached: Readys:{} / Threshold:{}, Echoes:{} / Threshold:{} for root:{}",
            readys,
            self.deliver_threshold(),
            echoes,
            self.decode_threshold(),
            root
        );
        RbcAction::Ignore
    }
}
