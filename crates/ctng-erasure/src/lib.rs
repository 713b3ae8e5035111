//! # CTng Erasure
//!
//! Reed-Solomon shard codec over GF(2^8) with `k` data shards and `m`
//! parity shards, `k + m = n`. An artifact is split into `k` equal-length
//! pieces (the last zero-padded), parity is computed over them, and any `k`
//! of the `n` shards reconstruct the rest by position. The unpadded length
//! travels with the shards so reconstruction can strip the padding.

use reed_solomon_erasure::galois_8::ReedSolomon;
use thiserror::Error;

/// Errors raised by shard encoding and reconstruction.
#[derive(Debug, Error)]
pub enum ErasureError {
    /// `k`/`m` do not form a usable code.
    #[error("invalid shard parameters: {0}")]
    InvalidParams(String),

    /// Fewer than `k` shards present.
    #[error("codec: {0}")]
    Codec(#[from] reed_solomon_erasure::Error),

    /// Shards disagree on length.
    #[error("shard length mismatch")]
    LengthMismatch,
}

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ErasureError>;

/// The `n` encoded shards plus the artifact's unpadded length.
#[derive(Debug, Clone)]
pub struct EncodedShards {
    /// `k` data shards followed by `m` parity shards, all equal length.
    pub shards: Vec<Vec<u8>>,
    /// Byte length of the original artifact.
    pub original_len: usize,
}

/// A `(k, m)` Reed-Solomon codec.
pub struct ShardCodec {
    k: usize,
    m: usize,
    inner: ReedSolomon,
}

impl ShardCodec {
    /// Build a codec with `k` data and `m` parity shards.
    pub fn new(k: usize, m: usize) -> Result<Self> {
        if k == 0 || m == 0 {
            return Err(ErasureError::InvalidParams(format!("k={k}, m={m}")));
        }
        Ok(ShardCodec {
            k,
            m,
            inner: ReedSolomon::new(k, m)?,
        })
    }

    /// Data shard count.
    pub fn data_shards(&self) -> usize {
        self.k
    }

    /// Total shard count.
    pub fn total_shards(&self) -> usize {
        self.k + self.m
    }

    /// Split `artifact` into `k` zero-padded data shards and compute the
    /// `m` parity shards.
    pub fn encode(&self, artifact: &[u8]) -> Result<EncodedShards> {
        let shard_len = std::cmp::max(1, artifact.len().div_ceil(self.k));
        let mut shards = Vec::with_capacity(self.k + self.m);
        for i in 0..self.k {
            let start = std::cmp::min(i * shard_len, artifact.len());
            let end = std::cmp::min(start + shard_len, artifact.len());
            let mut shard = artifact[start..end].to_vec();
            shard.resize(shard_len, 0);
            shards.push(shard);
        }
        shards.resize(self.k + self.m, vec![0u8; shard_len]);
        self.inner.encode(&mut shards)?;
        Ok(EncodedShards {
            shards,
            original_len: artifact.len(),
        })
    }

    /// Recover all missing positions from any `k` present shards.
    ///
    /// `shards` is indexed by position; `None` marks a missing entry. On
    /// success every position holds its original bytes.
    pub fn reconstruct(&self, shards: &mut Vec<Option<Vec<u8>>>) -> Result<()> {
        if shards.len() != self.k + self.m {
            return Err(ErasureError::InvalidParams(format!(
                "expected {} positions, got {}",
                self.k + self.m,
                shards.len()
            )));
        }
        let lens: Vec<usize> = shards.iter().flatten().map(Vec::len).collect();
        if lens.windows(2).any(|w| w[0] != w[1]) {
            return Err(ErasureError::LengthMismatch);
        }
        self.inner.reconstruct(shards)?;
        Ok(())
    }

    /// Concatenate the `k` data shards and strip to the unpadded length.
    pub fn concat_data(&self, shards: &[Vec<u8>], original_len: usize) -> Vec<u8> {
        let mut out: Vec<u8> = shards.iter().take(self.k).flatten().copied().collect();
        out.truncate(original_len);
        out
    }
}
