//! # CTng Logger
//!
//! The Logger collaborator. Each period it synthesizes a certificate
//! batch, builds the Merkle commitments, signs the tree head, and delivers
//! one update per monitor: a Reed-Solomon shard with inclusion proof in
//! EEA mode, or the full block list in default mode.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use ctng_core::{
    CtngId, DistributionMode, IssuerHead, IssuerSignature, LoggerFullUpdate, LoggerShardUpdate,
    Role, Settings, Sth,
};
use ctng_crypto::{Keyring, MerkleTree};
use ctng_erasure::ShardCodec;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while building or dispatching a period update.
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error(transparent)]
    Core(#[from] ctng_core::CoreError),

    #[error(transparent)]
    Crypto(#[from] ctng_crypto::CryptoError),

    #[error(transparent)]
    Erasure(#[from] ctng_erasure::ErasureError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("merkle tree over empty batch")]
    EmptyBatch,
}

/// The full set of artifacts prepared for one period.
pub struct PeriodUpdate {
    /// Per-monitor shard updates (EEA mode).
    pub shard_updates: BTreeMap<CtngId, LoggerShardUpdate>,
    /// Full-file update (default mode).
    pub full_update: LoggerFullUpdate,
}

/// A logger instance bound to its key material and the shared settings.
pub struct Logger {
    id: CtngId,
    keyring: Keyring,
    settings: Settings,
    period: u32,
    client: reqwest::Client,
}

impl Logger {
    pub fn new(id: CtngId, keyring: Keyring, settings: Settings) -> Result<Self, LoggerError> {
        settings.validate()?;
        Ok(Logger {
            id,
            keyring,
            settings,
            period: 1,
            client: reqwest::Client::new(),
        })
    }

    pub fn id(&self) -> &CtngId {
        &self.id
    }

    /// The deterministic dummy batch for this period, padded so it splits
    /// evenly into `k` shards.
    fn batch_bytes(&self) -> Vec<u8> {
        let (k, _) = self.settings.shard_params();
        let raw_size = self.settings.certificate_size * self.settings.certificate_per_logger;
        let padded = raw_size.div_ceil(k) * k;
        let shard_len = padded / k;
        // Byte (i + j) & 0xff at shard i offset j, matching the
        // simulation's synthetic certificate content.
        let mut batch = Vec::with_capacity(padded);
        for shard in 0..k {
            for offset in 0..shard_len {
                batch.push(((shard + offset) & 0xff) as u8);
            }
        }
        batch
    }

    /// Chunk the `k` data shards into certificate blocks, shard by shard.
    /// Verifying monitors re-chunk reconstructed shards the same way, so
    /// the block boundaries must be derived from shard boundaries.
    fn certificate_blocks(&self, data_shards: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let block_size = self.settings.certificate_size.max(1);
        let mut blocks = Vec::new();
        for shard in data_shards {
            for chunk in shard.chunks(block_size) {
                blocks.push(chunk.to_vec());
            }
        }
        blocks
    }

    fn sign_sth(&self, head: Vec<u8>, size: u32) -> Result<Sth, LoggerError> {
        let mut sth = Sth {
            lid: self.id.clone(),
            period: self.period,
            size,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            head,
            signature: IssuerSignature::default(),
        };
        let signing_bytes = sth.signing_bytes()?;
        sth.signature = self.keyring.sign(&signing_bytes, &self.id)?;
        Ok(sth)
    }

    /// Build every monitor's update for the current period.
    pub fn generate_update(&self) -> Result<PeriodUpdate, LoggerError> {
        let (k, m) = self.settings.shard_params();
        let codec = ShardCodec::new(k, m)?;
        let batch = self.batch_bytes();
        let encoded = codec.encode(&batch)?;
        let data_shards: Vec<Vec<u8>> = encoded.shards[..k].to_vec();

        let blocks = self.certificate_blocks(&data_shards);
        let cert_tree = MerkleTree::build(&blocks).ok_or(LoggerError::EmptyBatch)?;
        let cert_root = cert_tree.root();
        let size = blocks.len() as u32;

        // Default-mode head: the certificate root alone.
        let default_sth = self.sign_sth(cert_root.to_vec(), size)?;
        let full_update = LoggerFullUpdate {
            sth: default_sth,
            file: blocks,
        };

        // EEA head: the root over {rs_root, cert_root}.
        let rs_tree =
            MerkleTree::build(&encoded.shards).ok_or(LoggerError::EmptyBatch)?;
        let rs_root = rs_tree.root();
        let combined = MerkleTree::build(&[rs_root.to_vec(), cert_root.to_vec()])
            .ok_or(LoggerError::EmptyBatch)?;
        let eea_sth = self.sign_sth(combined.root().to_vec(), size)?;

        let mut shard_updates = BTreeMap::new();
        for (position, monitor) in self.settings.ids(Role::Monitor).into_iter().enumerate() {
            let poi = rs_tree.prove(position).ok_or(LoggerError::EmptyBatch)?;
            shard_updates.insert(
                monitor.clone(),
                LoggerShardUpdate {
                    monitor_id: monitor,
                    file_share: encoded.shards[position].clone(),
                    head_cert: cert_root.to_vec(),
                    head_rs: rs_root.to_vec(),
                    poi,
                    sth: eea_sth.clone(),
                },
            );
        }

        Ok(PeriodUpdate {
            shard_updates,
            full_update,
        })
    }

    /// Post each monitor its update over the configured distribution mode.
    pub async fn send_update(&self, update: &PeriodUpdate) -> Result<(), LoggerError> {
        for (monitor, addr) in self.settings.monitor_addresses()? {
            let (path, body) = match self.settings.distribution_mode {
                DistributionMode::Eea => {
                    let shard = &update.shard_updates[&monitor];
                    ("/monitor/logger_update_EEA", serde_json::to_vec(shard)?)
                }
                DistributionMode::Default => (
                    "/monitor/logger_update",
                    serde_json::to_vec(&update.full_update)?,
                ),
            };
            let url = format!("http://{addr}{path}");
            match self.client.post(&url).body(body).send().await {
                Ok(_) => info!(logger = %self.id, %monitor, "update sent"),
                Err(err) => warn!(logger = %self.id, %monitor, %err, "update send failed"),
            }
        }
        Ok(())
    }

    /// One period of logger activity: build the artifacts and ship them.
    pub async fn run_period(&self) -> Result<(), LoggerError> {
        let update = self.generate_update()?;
        self.send_update(&update).await
    }
}
