//! Systematic Reed-Solomon erasure codec.
//!
//! `split` turns a value into `N` shards, the first `N - 2f` of which carry the value itself.
//! Any `N - 2f` distinct shards are enough to `reconstruct` it.

use std::collections::BTreeMap;

use reed_solomon_simd::{ReedSolomonDecoder, ReedSolomonEncoder};
use thiserror::Error;

use crate::config::ConsensusConfig;

const LENGTH_PREFIX: usize = std::mem::size_of::<u64>();

#[derive(Error, Debug)]
pub enum CodingError {
    #[error("Invalid codec parameters: {data} data, {parity} parity, {total} total shards")]
    InvalidParameters {
        data: usize,
        parity: usize,
        total: usize,
    },
    #[error("Need {needed} shards to reconstruct, got {got}")]
    InsufficientShards { needed: usize, got: usize },
    #[error("Shard index {0} is out of range")]
    InvalidShardIndex(usize),
    #[error("Shards have different or invalid sizes")]
    InvalidShardSize,
    #[error("Reconstructed data has an invalid length prefix")]
    InvalidDataLength,
    #[error("Reed-Solomon: {0}")]
    ReedSolomon(#[from] reed_solomon_simd::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErasureCodec {
    data_shards: usize,
    parity_shards: usize,
    /// Shards handed out, one per producer. Can be smaller than `data + parity` when `f = 0`.
    total_shards: usize,
}

impl ErasureCodec {
    pub fn new(
        data_shards: usize,
        parity_shards: usize,
        total_shards: usize,
    ) -> Result<Self, CodingError> {
        let invalid = data_shards == 0
            || parity_shards == 0
            || total_shards < data_shards
            || total_shards > data_shards + parity_shards
            || data_shards + parity_shards > u16::MAX as usize;
        if invalid {
            return Err(CodingError::InvalidParameters {
                data: data_shards,
                parity: parity_shards,
                total: total_shards,
            });
        }
        Ok(Self {
            data_shards,
            parity_shards,
            total_shards,
        })
    }

    pub fn from_config(config: &ConsensusConfig) -> Result<Self, CodingError> {
        Self::new(config.data_shards(), config.parity_shards(), config.n())
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn total_shards(&self) -> usize {
        self.total_shards
    }

    /// Pads `data` behind a length prefix, cuts it into equal sized data shards and appends parity.
    pub fn split(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, CodingError> {
        let k = self.data_shards;

        let mut extended = Vec::with_capacity(LENGTH_PREFIX + data.len());
        extended.extend_from_slice(&(data.len() as u64).to_be_bytes());
        extended.extend_from_slice(data);

        // The encoder works on shards of even, non zero size.
        let mut shard_size = (extended.len() + k - 1) / k;
        shard_size += shard_size % 2;
        extended.resize(shard_size * k, 0);

        let mut shards: Vec<Vec<u8>> = extended.chunks(shard_size).map(<[u8]>::to_vec).collect();

        let mut encoder = ReedSolomonEncoder::new(k, self.parity_shards, shard_size)?;
        for shard in &shards {
            encoder.add_original_shard(shard)?;
        }
        let result = encoder.encode()?;
        shards.extend(result.recovery_iter().map(<[u8]>::to_vec));

        shards.truncate(self.total_shards);
        Ok(shards)
    }

    /// Recovers the value from any `N - 2f` shards keyed by shard index.
    pub fn reconstruct(&self, shards: &BTreeMap<usize, Vec<u8>>) -> Result<Vec<u8>, CodingError> {
        let k = self.data_shards;
        if shards.len() < k {
            return Err(CodingError::InsufficientShards {
                needed: k,
                got: shards.len(),
            });
        }
        if let Some(index) = shards.keys().find(|i| **i >= self.total_shards) {
            return Err(CodingError::InvalidShardIndex(*index));
        }
        let shard_size = shards.values().next().map(Vec::len).unwrap_or_default();
        if shard_size == 0 || shard_size % 2 != 0 || shards.values().any(|s| s.len() != shard_size)
        {
            return Err(CodingError::InvalidShardSize);
        }

        let mut originals: Vec<Option<Vec<u8>>> = (0..k).map(|i| shards.get(&i).cloned()).collect();

        if originals.iter().any(Option::is_none) {
            let mut decoder = ReedSolomonDecoder::new(k, self.parity_shards, shard_size)?;
            for (index, shard) in shards {
                if *index < k {
                    decoder.add_original_shard(*index, shard)?;
                } else {
                    decoder.add_recovery_shard(*index - k, shard)?;
                }
            }
            let result = decoder.decode()?;
            for (index, shard) in result.restored_original_iter() {
                if let Some(slot) = originals.get_mut(index) {
                    *slot = Some(shard.to_vec());
                }
            }
        }

        let mut data = Vec::with_capacity(k * shard_size);
        for shard in originals {
            data.extend(shard.ok_or(CodingError::InsufficientShards {
                needed: k,
                got: shards.len(),
            })?);
        }

        let prefix: [u8; LENGTH_PREFIX] = data
            .get(..LENGTH_PREFIX)
            .and_then(|p| p.try_into().ok())
            .ok_or(CodingError::InvalidDataLength)?;
        let len = u64::from_be_bytes(prefix) as usize;
        let end = LENGTH_PREFIX
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or(CodingError::InvalidDataLength)?;
        data.truncate(end);
        data.drain(..LENGTH_PREFIX);
        Ok(data)
    }
}
