//! Per-group consensus configuration and its TOML representation.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::utilities::PublicKey;

pub const DEFAULT_EPOCH_WINDOW: u64 = 16;
pub const DEFAULT_FINALIZED_CACHE_SIZE: usize = 10_000;
pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Producer set is empty")]
    EmptyProducerSet,
    #[error("Producer {0} is listed more than once")]
    DuplicateProducer(PublicKey),
    #[error("Local key {0} is not a producer of this group")]
    NotAProducer(PublicKey),
    #[error("{nodes} producers cannot tolerate {faulty} faulty ones, 3f < N is required")]
    TooManyFaulty { nodes: usize, faulty: usize },
    #[error("Batch size must be positive")]
    ZeroBatchSize,
    #[error("Epoch window must be positive")]
    ZeroEpochWindow,
    #[error("Signing key {0} does not belong to the configured producer")]
    SignerMismatch(PublicKey),
    #[error("Codec: {0}")]
    Codec(String),
}

/// Immutable configuration of one BFT driver.
///
/// A producer set change means a new `ConsensusConfig` and fresh consensus state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusConfig {
    group_id: String,
    /// Sorted ascending, shard `i` of every broadcast belongs to `nodes[i]`.
    nodes: Vec<PublicKey>,
    faulty: usize,
    my_pubkey: PublicKey,
    owner_pubkey: PublicKey,
    batch_size: usize,
    epoch_window: u64,
    resend_interval: Option<Duration>,
    finalized_cache_size: usize,
}

impl ConsensusConfig {
    /// Creates a configuration tolerating the maximum `f = (N - 1) / 3`.
    pub fn new(
        group_id: impl Into<String>,
        nodes: Vec<PublicKey>,
        my_pubkey: PublicKey,
        owner_pubkey: PublicKey,
        batch_size: usize,
    ) -> Result<Self, ConfigError> {
        let faulty = nodes.len().saturating_sub(1) / 3;
        Self::with_faulty(group_id, nodes, my_pubkey, owner_pubkey, batch_size, faulty)
    }

    pub fn with_faulty(
        group_id: impl Into<String>,
        nodes: Vec<PublicKey>,
        my_pubkey: PublicKey,
        owner_pubkey: PublicKey,
        batch_size: usize,
        faulty: usize,
    ) -> Result<Self, ConfigError> {
        if nodes.is_empty() {
            return Err(ConfigError::EmptyProducerSet);
        }
        let mut unique = BTreeSet::new();
        for node in &nodes {
            if !unique.insert(node.clone()) {
                return Err(ConfigError::DuplicateProducer(node.clone()));
            }
        }
        if 3 * faulty >= nodes.len() {
            return Err(ConfigError::TooManyFaulty {
                nodes: nodes.len(),
                faulty,
            });
        }
        if batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if !unique.contains(&my_pubkey) {
            return Err(ConfigError::NotAProducer(my_pubkey));
        }

        Ok(Self {
            group_id: group_id.into(),
            nodes: unique.into_iter().collect(),
            faulty,
            my_pubkey,
            owner_pubkey,
            batch_size,
            epoch_window: DEFAULT_EPOCH_WINDOW,
            resend_interval: None,
            finalized_cache_size: DEFAULT_FINALIZED_CACHE_SIZE,
        })
    }

    pub fn with_epoch_window(mut self, epoch_window: u64) -> Result<Self, ConfigError> {
        if epoch_window == 0 {
            return Err(ConfigError::ZeroEpochWindow);
        }
        self.epoch_window = epoch_window;
        Ok(self)
    }

    pub fn with_resend_interval(mut self, interval: Option<Duration>) -> Self {
        self.resend_interval = interval;
        self
    }

    pub fn with_finalized_cache_size(mut self, size: usize) -> Self {
        self.finalized_cache_size = size.max(1);
        self
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn nodes(&self) -> &[PublicKey] {
        &self.nodes
    }

    pub fn my_pubkey(&self) -> &PublicKey {
        &self.my_pubkey
    }

    pub fn owner_pubkey(&self) -> &PublicKey {
        &self.owner_pubkey
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn epoch_window(&self) -> u64 {
        self.epoch_window
    }

    pub fn resend_interval(&self) -> Option<Duration> {
        self.resend_interval
    }

    pub fn finalized_cache_size(&self) -> usize {
        self.finalized_cache_size
    }

    /// Number of producers, `N`.
    pub fn n(&self) -> usize {
        self.nodes.len()
    }

    /// Maximum number of faulty producers tolerated, `f`.
    pub fn f(&self) -> usize {
        self.faulty
    }

    pub fn is_producer(&self, key: &PublicKey) -> bool {
        self.index_of(key).is_some()
    }

    pub fn index_of(&self, key: &PublicKey) -> Option<usize> {
        self.nodes.binary_search(key).ok()
    }

    pub fn echo_threshold(&self) -> usize {
        self.n() - self.f()
    }

    pub fn data_shards(&self) -> usize {
        self.n() - 2 * self.f()
    }

    pub fn parity_shards(&self) -> usize {
        (2 * self.f()).max(1)
    }

    pub fn ready_amplify_threshold(&self) -> usize {
        self.f() + 1
    }

    pub fn ready_deliver_threshold(&self) -> usize {
        2 * self.f() + 1
    }

    pub fn acs_quorum(&self) -> usize {
        self.n() - self.f()
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    pub node: NodeSettings,
    pub consensus: ConsensusSettings,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct NodeSettings {
    /// Hex encoded ed25519 seed.
    pub private_key: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ConsensusSettings {
    pub group_id: String,
    pub producers: Vec<String>,
    pub owner: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub faulty: Option<usize>,
    #[serde(default = "default_epoch_window")]
    pub epoch_window: u64,
    #[serde(default)]
    pub resend_interval_ms: Option<u64>,
    #[serde(default = "default_finalized_cache_size")]
    pub finalized_cache_size: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_epoch_window() -> u64 {
    DEFAULT_EPOCH_WINDOW
}

fn default_finalized_cache_size() -> usize {
    DEFAULT_FINALIZED_CACHE_SIZE
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Settings> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn consensus_config(&self, my_pubkey: PublicKey) -> Result<ConsensusConfig, ConfigError> {
        let consensus = &self.consensus;
        let nodes = consensus
            .producers
            .iter()
            .map(|p| PublicKey::new(p.as_str()))
            .collect::<Vec<_>>();
        let owner = PublicKey::new(consensus.owner.as_str());

        let config = match consensus.faulty {
            Some(faulty) => ConsensusConfig::with_faulty(
                consensus.group_id.clone(),
                nodes,
                my_pubkey,
                owner,
                consensus.batch_size,
                faulty,
            )?,
            None => ConsensusConfig::new(
                consensus.group_id.clone(),
                nodes,
                my_pubkey,
                owner,
                consensus.batch_size,
            )?,
        };

        Ok(config
            .with_epoch_window(consensus.epoch_window)?
            .with_resend_interval(consensus.resend_interval_ms.map(Duration::from_millis))
            .with_finalized_cache_size(consensus.finalized_cache_size))
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use assert_matches::assert_matches;

    use super::*;

    fn keys(names: &[&str]) -> Vec<PublicKey> {
        names.iter().map(|n| PublicKey::from(*n)).collect()
    }

    #[test]
    fn test_thresholds_four_nodes() {
        let config =
            ConsensusConfig::new("g", keys(&["d", "c", "b", "a"]), "a".into(), "a".into(), 10)
                .unwrap();
        assert_eq!(config.n(), 4);
        assert_eq!(config.f(), 1);
        assert_eq!(config.echo_threshold(), 3);
        assert_eq!(config.data_shards(), 2);
        assert_eq!(config.parity_shards(), 2);
        assert_eq!(config.ready_amplify_threshold(), 2);
        assert_eq!(config.ready_deliver_threshold(), 3);
        assert_eq!(config.acs_quorum(), 3);
        assert_eq!(config.nodes(), keys(&["a", "b", "c", "d"]).as_slice());
        assert_eq!(config.index_of(&"c".into()), Some(2));
    }

    #[test]
    fn test_single_node_forces_parity() {
        let config = ConsensusConfig::new("g", keys(&["a"]), "a".into(), "a".into(), 1).unwrap();
        assert_eq!(config.f(), 0);
        assert_eq!(config.data_shards(), 1);
        assert_eq!(config.parity_shards(), 1);
    }

    #[test]
    fn test_invalid_configs() {
        assert_matches!(
            ConsensusConfig::new("g", vec![], "a".into(), "a".into(), 1),
            Err(ConfigError::EmptyProducerSet)
        );
        assert_matches!(
            ConsensusConfig::new("g", keys(&["a", "a"]), "a".into(), "a".into(), 1),
            Err(ConfigError::DuplicateProducer(_))
        );
        assert_matches!(
            ConsensusConfig::new("g", keys(&["a", "b"]), "x".into(), "a".into(), 1),
            Err(ConfigError::NotAProducer(_))
        );
        assert_matches!(
            ConsensusConfig::with_faulty("g", keys(&["a", "b", "c"]), "a".into(), "a".into(), 1, 1),
            Err(ConfigError::TooManyFaulty { nodes: 3, faulty: 1 })
        );
        assert_matches!(
            ConsensusConfig::new("g", keys(&["a"]), "a".into(), "a".into(), 0),
            Err(ConfigError::ZeroBatchSize)
        );
    }

    #[test]
    fn test_load_settings() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[node]
private_key = "00"

[consensus]
group_id = "group-1"
producers = ["a", "b", "c", "d"]
owner = "a"
batch_size = 20
resend_interval_ms = 500
"#
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.consensus.epoch_window, DEFAULT_EPOCH_WINDOW);

        let config = settings.consensus_config("b".into()).unwrap();
        assert_eq!(config.group_id(), "group-1");
        assert_eq!(config.batch_size(), 20);
        assert_eq!(config.f(), 1);
        assert_eq!(config.resend_interval(), Some(Duration::from_millis(500)));
    }
}
