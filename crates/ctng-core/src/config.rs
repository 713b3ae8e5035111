//! Experiment settings: network topology, timers, and mode selection.
//!
//! The settings file is JSON with the historical field names, shared by
//! every role in a deployment. `validate` runs at startup for all roles;
//! a monitor additionally derives its Reed-Solomon parameters from
//! [`Settings::shard_params`], which enforces `k + m = n`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::identifiers::{CtngId, Role};

/// How issuers distribute their artifact to the monitor federation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionMode {
    /// Every monitor receives the full artifact.
    #[serde(rename = "default")]
    Default,
    /// Erasure-Encoded Algorithm: every monitor receives one shard.
    #[serde(rename = "EEA")]
    Eea,
}

/// Peer-gossip request discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastMode {
    /// Request on every novel notification; minimizes wait time.
    #[serde(rename = "MIN_WT")]
    MinWt,
    /// Request once, fall back on a timer; minimizes bandwidth.
    #[serde(rename = "MIN_BC")]
    MinBc,
}

/// The shared experiment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "Ipmap")]
    pub ipmap: BTreeMap<CtngId, String>,
    #[serde(rename = "Portmap")]
    pub portmap: BTreeMap<CtngId, String>,
    #[serde(rename = "Num_Monitors")]
    pub num_monitors: usize,
    /// Tolerated faulty monitors (`f`). The BLS threshold is `f + 1`.
    #[serde(rename = "Mal")]
    pub mal: usize,
    #[serde(rename = "Update_Wait_time")]
    pub update_wait_time: u64,
    #[serde(rename = "Mature_Wait_time")]
    pub mature_wait_time: u64,
    #[serde(rename = "Response_Wait_time")]
    pub response_wait_time: u64,
    #[serde(rename = "Verification_Wait_time")]
    pub verification_wait_time: u64,
    /// Process lifetime in seconds; convergence records are dumped when it
    /// expires.
    #[serde(rename = "MUD")]
    pub mud: u64,
    #[serde(rename = "Distribution_Mode")]
    pub distribution_mode: DistributionMode,
    #[serde(rename = "Broadcasting_Mode")]
    pub broadcasting_mode: BroadcastMode,
    #[serde(rename = "Num_CAs")]
    pub num_cas: usize,
    #[serde(rename = "CRV_size")]
    pub crv_size: usize,
    #[serde(rename = "Revocation_ratio")]
    pub revocation_ratio: f64,
    #[serde(rename = "Num_Loggers")]
    pub num_loggers: usize,
    #[serde(rename = "Certificate_size")]
    pub certificate_size: usize,
    #[serde(rename = "Certificate_per_logger")]
    pub certificate_per_logger: usize,
}

/// Inputs for generating a settings file for a deployment.
#[derive(Debug, Clone)]
pub struct TopologyParams {
    pub num_cas: usize,
    pub num_loggers: usize,
    pub num_monitors: usize,
    pub mal: usize,
    pub ca_mask: String,
    pub ca_offset: usize,
    pub logger_mask: String,
    pub logger_offset: usize,
    pub monitor_mask: String,
    pub monitor_offset: usize,
    pub starting_port: u16,
    pub update_wait_time: u64,
    pub mature_wait_time: u64,
    pub response_wait_time: u64,
    pub verification_wait_time: u64,
    pub mud: u64,
    pub distribution_mode: DistributionMode,
    pub broadcasting_mode: BroadcastMode,
    pub crv_size: usize,
    pub revocation_ratio: f64,
    pub certificate_size: usize,
    pub certificate_per_logger: usize,
}

impl Settings {
    /// Load and validate a settings file.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let raw = std::fs::read(path)?;
        let settings: Settings = serde_json::from_slice(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write the settings as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let raw = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Structural validation shared by every role.
    pub fn validate(&self) -> crate::Result<()> {
        if self.num_monitors == 0 {
            return Err(CoreError::InvalidSettings("no monitors".into()));
        }
        if self.mal + 1 > self.num_monitors {
            return Err(CoreError::InvalidSettings(format!(
                "threshold {} exceeds monitor count {}",
                self.mal + 1,
                self.num_monitors
            )));
        }
        let (k, m) = self.shard_params();
        if k + m != self.num_monitors {
            return Err(CoreError::InvalidSettings(format!(
                "shard parameters {k}+{m} do not cover {} monitors",
                self.num_monitors
            )));
        }
        for role in [Role::Ca, Role::Logger, Role::Monitor] {
            for id in self.ids(role) {
                if !self.portmap.contains_key(&id) {
                    return Err(CoreError::InvalidSettings(format!("{id} missing port")));
                }
            }
        }
        Ok(())
    }

    /// Reed-Solomon parameters: `k = f + 1` data shards, `m = n − k`
    /// parity shards.
    pub fn shard_params(&self) -> (usize, usize) {
        let k = self.mal + 1;
        (k, self.num_monitors - k)
    }

    /// The BLS aggregation threshold, `f + 1`.
    pub fn threshold(&self) -> usize {
        self.mal + 1
    }

    /// All configured ids for a role, in index order.
    pub fn ids(&self, role: Role) -> Vec<CtngId> {
        let count = match role {
            Role::Ca => self.num_cas,
            Role::Logger => self.num_loggers,
            Role::Monitor => self.num_monitors,
        };
        (1..=count).map(|i| CtngId::new(role, i)).collect()
    }

    /// `ip:port` for one entity.
    pub fn address_of(&self, id: &CtngId) -> crate::Result<String> {
        let ip = self
            .ipmap
            .get(id)
            .ok_or_else(|| CoreError::InvalidSettings(format!("{id} missing ip")))?;
        let port = self
            .portmap
            .get(id)
            .ok_or_else(|| CoreError::InvalidSettings(format!("{id} missing port")))?;
        Ok(format!("{ip}:{port}"))
    }

    /// `ip:port` for every monitor.
    pub fn monitor_addresses(&self) -> crate::Result<BTreeMap<CtngId, String>> {
        let mut out = BTreeMap::new();
        for id in self.ids(Role::Monitor) {
            out.insert(id.clone(), self.address_of(&id)?);
        }
        Ok(out)
    }

    /// Build a settings file from topology parameters, assigning ports
    /// sequentially across CAs, loggers, then monitors.
    pub fn from_topology(params: &TopologyParams) -> Self {
        let mut ipmap = BTreeMap::new();
        let mut portmap = BTreeMap::new();
        let mut port = params.starting_port;

        let mut assign = |role: Role, count: usize, mask: &str, offset: usize| {
            for i in 0..count {
                let id = CtngId::new(role, i + 1);
                ipmap.insert(id.clone(), format!("{mask}{}", i + offset));
                portmap.insert(id, port.to_string());
                port += 1;
            }
        };
        assign(Role::Ca, params.num_cas, &params.ca_mask, params.ca_offset);
        assign(
            Role::Logger,
            params.num_loggers,
            &params.logger_mask,
            params.logger_offset,
        );
        assign(
            Role::Monitor,
            params.num_monitors,
            &params.monitor_mask,
            params.monitor_offset,
        );

        Settings {
            ipmap,
            portmap,
            num_monitors: params.num_monitors,
            mal: params.mal,
            update_wait_time: params.update_wait_time,
            mature_wait_time: params.mature_wait_time,
            response_wait_time: params.response_wait_time,
            verification_wait_time: params.verification_wait_time,
            mud: params.mud,
            distribution_mode: params.distribution_mode,
            broadcasting_mode: params.broadcasting_mode,
            num_cas: params.num_cas,
            crv_size: params.crv_size,
            revocation_ratio: params.revocation_ratio,
            num_loggers: params.num_loggers,
            certificate_size: params.certificate_size,
            certificate_per_logger: params.certificate_per_logger,
        }
    }
}
