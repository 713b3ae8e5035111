//! # CTng CA
//!
//! The CA collaborator. Each period it draws a random revocation
//! bit-vector, gzip-compresses it into the DCRV, signs a revocation head
//! over it, and delivers one Reed-Solomon shard with inclusion proof to
//! every monitor (EEA mode) or a bare signed head (default mode, where the
//! revocation data travels out of band).

use std::collections::BTreeMap;
use std::io::{Read, Write};

use chrono::{SecondsFormat, Utc};
use ctng_core::{
    CaShardUpdate, CtngId, IssuerHead, IssuerSignature, Role, Settings, Srh,
};
use ctng_crypto::{sha256, Keyring, MerkleTree};
use ctng_erasure::ShardCodec;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while building or dispatching a period update.
#[derive(Debug, Error)]
pub enum CaError {
    #[error(transparent)]
    Core(#[from] ctng_core::CoreError),

    #[error(transparent)]
    Crypto(#[from] ctng_crypto::CryptoError),

    #[error(transparent)]
    Erasure(#[from] ctng_erasure::ErasureError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("compression: {0}")]
    Compression(#[from] std::io::Error),

    #[error("merkle tree over empty shard set")]
    EmptyShardSet,
}

/// Gzip-compress a serialized bit-vector into its DCRV form.
pub fn compress_dcrv(raw: &[u8]) -> Result<Vec<u8>, CaError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw)?;
    Ok(encoder.finish()?)
}

/// Inverse of [`compress_dcrv`].
pub fn decompress_dcrv(compressed: &[u8]) -> Result<Vec<u8>, CaError> {
    let mut decoder = GzDecoder::new(compressed);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// A random revocation bit-vector of `total_bits` bits with roughly
/// `density` of them set, packed little-endian within each byte and
/// gzip-compressed.
pub fn random_compressed_dcrv(
    total_bits: usize,
    density: f64,
    rng: &mut impl Rng,
) -> Result<Vec<u8>, CaError> {
    let mut bitmap = vec![0u8; total_bits.div_ceil(8)];
    let revoked = (total_bits as f64 * density) as usize;
    let mut set = 0;
    while set < revoked {
        let position = rng.gen_range(0..total_bits);
        let byte = position / 8;
        let mask = 1u8 << (position % 8);
        if bitmap[byte] & mask == 0 {
            bitmap[byte] |= mask;
            set += 1;
        }
    }
    compress_dcrv(&bitmap)
}

/// A CA instance bound to its key material and the shared settings.
pub struct Ca {
    id: CtngId,
    keyring: Keyring,
    settings: Settings,
    period: u32,
    client: reqwest::Client,
}

impl Ca {
    pub fn new(id: CtngId, keyring: Keyring, settings: Settings) -> Result<Self, CaError> {
        settings.validate()?;
        Ok(Ca {
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

    /// Default-mode SRH: no head field; the signature covers the
    /// serialized head followed by the CRV and DCRV digests.
    pub fn generate_srh(&self, crv: &[u8], dcrv: &[u8]) -> Result<Srh, CaError> {
        let mut srh = Srh {
            caid: self.id.clone(),
            period: self.period,
            head: Vec::new(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            signature: IssuerSignature::default(),
        };
        let mut message = srh.signing_bytes()?;
        message.extend_from_slice(&sha256(crv));
        message.extend_from_slice(&sha256(dcrv));
        srh.signature = self.keyring.sign(&message, &self.id)?;
        Ok(srh)
    }

    /// EEA-mode SRH: the head is `sha256(crv) ‖ sha256(dcrv) ‖ rs_root`
    /// and the signature covers the canonical serialized form.
    pub fn generate_srh_eea(
        &self,
        crv: &[u8],
        dcrv: &[u8],
        rs_root: &[u8],
    ) -> Result<Srh, CaError> {
        let mut head = Vec::with_capacity(64 + rs_root.len());
        head.extend_from_slice(&sha256(crv));
        head.extend_from_slice(&sha256(dcrv));
        head.extend_from_slice(rs_root);
        let mut srh = Srh {
            caid: self.id.clone(),
            period: self.period,
            head,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            signature: IssuerSignature::default(),
        };
        let signing_bytes = srh.signing_bytes()?;
        srh.signature = self.keyring.sign(&signing_bytes, &self.id)?;
        Ok(srh)
    }

    /// Build the per-monitor shard updates for the current period.
    ///
    /// The simulated CRV and DCRV are the same buffer; both digests are
    /// still computed independently.
    pub fn generate_update_eea(
        &self,
        rng: &mut impl Rng,
    ) -> Result<BTreeMap<CtngId, CaShardUpdate>, CaError> {
        let (k, m) = self.settings.shard_params();
        let codec = ShardCodec::new(k, m)?;
        let dcrv = random_compressed_dcrv(
            self.settings.crv_size,
            self.settings.revocation_ratio,
            rng,
        )?;
        let encoded = codec.encode(&dcrv)?;

        let rs_tree = MerkleTree::build(&encoded.shards).ok_or(CaError::EmptyShardSet)?;
        let rs_root = rs_tree.root();
        let srh = self.generate_srh_eea(&dcrv, &dcrv, &rs_root)?;

        let mut updates = BTreeMap::new();
        for (position, monitor) in self.settings.ids(Role::Monitor).into_iter().enumerate() {
            let poi = rs_tree.prove(position).ok_or(CaError::EmptyShardSet)?;
            updates.insert(
                monitor.clone(),
                CaShardUpdate {
                    monitor_id: monitor,
                    file_share: encoded.shards[position].clone(),
                    head_rs: rs_root.to_vec(),
                    poi,
                    srh: srh.clone(),
                    original_len: encoded.original_len as u32,
                },
            );
        }
        Ok(updates)
    }

    /// Post each monitor its shard update.
    pub async fn send_update_eea(
        &self,
        updates: &BTreeMap<CtngId, CaShardUpdate>,
    ) -> Result<(), CaError> {
        for (monitor, addr) in self.settings.monitor_addresses()? {
            let Some(update) = updates.get(&monitor) else {
                continue;
            };
            let url = format!("http://{addr}/monitor/ca_update_EEA");
            let body = serde_json::to_vec(update)?;
            match self.client.post(&url).body(body).send().await {
                Ok(_) => info!(ca = %self.id, %monitor, "update sent"),
                Err(err) => warn!(ca = %self.id, %monitor, %err, "update send failed"),
            }
        }
        Ok(())
    }

    /// One period of CA activity: build the shard updates and ship them.
    pub async fn run_period(&self, rng: &mut impl Rng) -> Result<(), CaError> {
        let updates = self.generate_update_eea(rng)?;
        self.send_update_eea(&updates).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctng_core::config::TopologyParams;
    use ctng_core::{BroadcastMode, DistributionMode};
    use ctng_crypto::merkle;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings() -> Settings {
        Settings::from_topology(&TopologyParams {
            num_cas: 1,
            num_loggers: 1,
            num_monitors: 4,
            mal: 1,
            ca_mask: "127.0.0.".into(),
            ca_offset: 1,
            logger_mask: "127.0.0.".into(),
            logger_offset: 1,
            monitor_mask: "127.0.0.".into(),
            monitor_offset: 1,
            starting_port: 8200,
            update_wait_time: 1,
            mature_wait_time: 0,
            response_wait_time: 1,
            verification_wait_time: 1,
            mud: 30,
            distribution_mode: DistributionMode::Eea,
            broadcasting_mode: BroadcastMode::MinWt,
            crv_size: 4096,
            revocation_ratio: 0.01,
            certificate_size: 100,
            certificate_per_logger: 10,
        })
    }

    fn ca() -> Ca {
        let mut rng = StdRng::seed_from_u64(3);
        let keyring = Keyring::generate(1, 1, 4, 2, &mut rng).unwrap();
        Ca::new("C1".parse().unwrap(), keyring, settings()).unwrap()
    }

    #[test]
    fn dcrv_round_trips_through_compression() {
        let mut rng = StdRng::seed_from_u64(9);
        let dcrv = random_compressed_dcrv(4096, 0.05, &mut rng).unwrap();
        let raw = decompress_dcrv(&dcrv).unwrap();
        assert_eq!(raw.len(), 4096 / 8);
        let ones: u32 = raw.iter().map(|b| b.count_ones()).sum();
        assert_eq!(ones, (4096.0_f64 * 0.05) as u32);
    }

    #[test]
    fn eea_updates_bind_shards_to_the_head() {
        let ca = ca();
        let mut rng = StdRng::seed_from_u64(21);
        let updates = ca.generate_update_eea(&mut rng).unwrap();
        assert_eq!(updates.len(), 4);

        for update in updates.values() {
            assert!(merkle::verify(
                &update.head_rs,
                &update.poi,
                &update.file_share
            ));
            // Head layout: hcrv ‖ hdcrv ‖ rs_root.
            assert_eq!(update.srh.head.len(), 96);
            assert_eq!(&update.srh.head[64..], update.head_rs.as_slice());
        }
    }

    #[test]
    fn srh_signature_verifies() {
        let ca = ca();
        let mut rng = StdRng::seed_from_u64(22);
        let updates = ca.generate_update_eea(&mut rng).unwrap();
        let srh = &updates.values().next().unwrap().srh;
        let bytes = srh.signing_bytes().unwrap();
        ca.keyring.verify(&bytes, &srh.signature).unwrap();
    }

    #[test]
    fn reconstructed_dcrv_matches_head_digests() {
        let ca = ca();
        let mut rng = StdRng::seed_from_u64(23);
        let updates = ca.generate_update_eea(&mut rng).unwrap();
        let sample = updates.values().next().unwrap();

        let codec = ShardCodec::new(2, 2).unwrap();
        let mut holes: Vec<Option<Vec<u8>>> = updates
            .values()
            .map(|u| Some(u.file_share.clone()))
            .collect();
        holes[1] = None;
        holes[2] = None;
        codec.reconstruct(&mut holes).unwrap();
        let shards: Vec<Vec<u8>> = holes.into_iter().flatten().collect();
        let dcrv = codec.concat_data(&shards, sample.original_len as usize);

        assert_eq!(&sample.srh.head[..32], &sha256(&dcrv)[..]);
        assert_eq!(&sample.srh.head[32..64], &sha256(&dcrv)[..]);
    }

    #[test]
    fn default_srh_signature_covers_artifact_digests() {
        let ca = ca();
        let dcrv = vec![7u8; 64];
        let srh = ca.generate_srh(&dcrv, &dcrv).unwrap();
        assert!(srh.head.is_empty());

        let mut message = srh.signing_bytes().unwrap();
        message.extend_from_slice(&sha256(&dcrv));
        message.extend_from_slice(&sha256(&dcrv));
        ca.keyring.verify(&message, &srh.signature).unwrap();

        // A different artifact digest must break the signature.
        let mut other = srh.signing_bytes().unwrap();
        other.extend_from_slice(&sha256(b"other"));
        other.extend_from_slice(&sha256(&dcrv));
        assert!(ca.keyring.verify(&other, &srh.signature).is_err());
    }
}
