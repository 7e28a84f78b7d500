//! Epoch driven agreement: ACS over one RBC per producer, and the generic epoch engine running on
//! top of it for each [`ProposalKind`](crate::broadcast::ProposalKind).

use std::sync::Arc;

use crate::coding::ErasureCodec;
use crate::config::{ConfigError, ConsensusConfig};
use crate::utilities::Signer;

pub(crate) mod acs;
pub(crate) mod bft;
pub(crate) mod psync;
pub(crate) mod trx;

#[cfg(test)]
pub(crate) mod test;

/// How an error from handling a consensus message is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad signature or proof. Expected from Byzantine peers.
    Verification,
    /// Duplicates, unknown proposers, messages from the wrong producer.
    ProtocolViolation,
    /// Message for an epoch that is already finalized.
    StaleEpoch,
    /// Local setup is wrong. Surfaced to the caller.
    Configuration,
    Internal,
}

impl ErrorClass {
    /// Logs `err` at the level its class calls for.
    pub(crate) fn log(&self, group_id: &str, epoch: u64, err: &dyn std::fmt::Display) {
        match self {
            ErrorClass::Verification => {
                log::warn!("<{group_id}> epoch {epoch}: dropped message: {err}")
            }
            ErrorClass::ProtocolViolation => {
                log::debug!("<{group_id}> epoch {epoch}: dropped message: {err}")
            }
            ErrorClass::StaleEpoch => {}
            ErrorClass::Configuration | ErrorClass::Internal => {
                log::error!("<{group_id}> epoch {epoch}: {err}")
            }
        }
    }
}

/// Everything an engine, its ACS instances and their RBC instances share within one group.
pub struct GroupContext {
    pub config: ConsensusConfig,
    pub signer: Arc<dyn Signer>,
    pub codec: ErasureCodec,
}

impl GroupContext {
    pub fn new(config: ConsensusConfig, signer: Arc<dyn Signer>) -> Result<Self, ConfigError> {
        let signer_key = signer.public_key();
        if &signer_key != config.my_pubkey() {
            return Err(ConfigError::SignerMismatch(signer_key));
        }
        let codec =
            ErasureCodec::from_config(&config).map_err(|e| ConfigError::Codec(e.to_string()))?;
        Ok(Self {
            config,
            signer,
            codec,
        })
    }

    pub fn group_id(&self) -> &str {
        self.config.group_id()
    }
}
