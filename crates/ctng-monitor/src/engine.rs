//! The monitor engine: FSM table, broadcast plumbing, and the convergence
//! dump.
//!
//! The engine is the transport-independent half of the monitor. HTTP
//! handlers (or a test dispatcher) translate wire payloads into the
//! `handle_*` methods in the `revocation` and `transparency` modules; the
//! engine owns one FSM per known issuer and the outbound seam.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ctng_core::records::format_traffic;
use ctng_core::{
    CaShardUpdate, ConvergenceRecord, CtngId, LoggerShardUpdate, Role, Settings, Srh, Sth,
};
use ctng_crypto::Keyring;
use ctng_erasure::ShardCodec;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::MonitorError;
use crate::fsm::IssuerFsm;
use crate::outbound::Outbound;

/// CA-side state machine.
pub type CaFsm = IssuerFsm<Srh, CaShardUpdate>;
/// Logger-side state machine.
pub type LoggerFsm = IssuerFsm<Sth, LoggerShardUpdate>;

/// The period covered by the one-shot simulation.
const CURRENT_PERIOD: u32 = 1;

pub(crate) struct EngineInner {
    pub(crate) id: CtngId,
    pub(crate) self_addr: String,
    pub(crate) settings: Settings,
    pub(crate) keyring: Keyring,
    /// Every monitor address, own included; broadcasts loop back so the
    /// sender processes its own gossip through the same path as peers.
    pub(crate) monitors: BTreeMap<CtngId, String>,
    pub(crate) ca_fsms: Vec<Arc<CaFsm>>,
    pub(crate) logger_fsms: Vec<Arc<LoggerFsm>>,
    pub(crate) codec: ShardCodec,
    pub(crate) outbound: Box<dyn Outbound>,
}

/// Cheaply cloneable handle to the monitor state, shared by HTTP handlers
/// and timer tasks.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl Engine {
    /// Build the engine for one monitor: validates settings, derives the
    /// shard codec, and creates one FSM per known issuer.
    pub fn new(
        id: CtngId,
        settings: Settings,
        keyring: Keyring,
        outbound: Box<dyn Outbound>,
    ) -> Result<Self, MonitorError> {
        settings.validate()?;
        let (k, m) = settings.shard_params();
        let codec = ShardCodec::new(k, m)?;
        let self_addr = settings.address_of(&id)?;
        let monitors = settings.monitor_addresses()?;

        let mode = settings.broadcasting_mode;
        let positions = settings.num_monitors;
        let ca_fsms = settings
            .ids(Role::Ca)
            .into_iter()
            .map(|id| Arc::new(CaFsm::new(id, CURRENT_PERIOD, positions, mode)))
            .collect();
        let logger_fsms = settings
            .ids(Role::Logger)
            .into_iter()
            .map(|id| Arc::new(LoggerFsm::new(id, CURRENT_PERIOD, positions, mode)))
            .collect();

        Ok(Engine {
            inner: Arc::new(EngineInner {
                id,
                self_addr,
                settings,
                keyring,
                monitors,
                ca_fsms,
                logger_fsms,
                codec,
                outbound,
            }),
        })
    }

    /// This monitor's id.
    pub fn id(&self) -> &CtngId {
        &self.inner.id
    }

    /// This monitor's `ip:port`.
    pub fn self_addr(&self) -> &str {
        &self.inner.self_addr
    }

    /// The shared experiment settings.
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// The CA FSM for an issuer id, if it is a known CA.
    pub fn ca_fsm(&self, id: &CtngId) -> Option<&Arc<CaFsm>> {
        let index = id.index().ok()?;
        if id.role().ok()? != Role::Ca {
            return None;
        }
        self.inner.ca_fsms.get(index)
    }

    /// The Logger FSM for an issuer id, if it is a known Logger.
    pub fn logger_fsm(&self, id: &CtngId) -> Option<&Arc<LoggerFsm>> {
        let index = id.index().ok()?;
        if id.role().ok()? != Role::Logger {
            return None;
        }
        self.inner.logger_fsms.get(index)
    }

    /// Quorum size for partial-signature aggregation (`f + 1`).
    pub(crate) fn quorum(&self) -> usize {
        self.inner.settings.threshold()
    }

    /// Fragments needed for reconstruction (`k`).
    pub(crate) fn required_shards(&self) -> usize {
        self.inner.codec.data_shards()
    }

    /// The shard position owned by a monitor id, bounds-checked against
    /// the federation size.
    pub(crate) fn shard_position(&self, monitor: &CtngId) -> Option<usize> {
        let position = monitor.index().ok()?;
        (position < self.inner.settings.num_monitors).then_some(position)
    }

    /// Fire-and-forget POST of `payload` to every monitor, self included.
    pub(crate) fn broadcast<T: Serialize>(&self, path: &'static str, payload: &T) {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, path, "broadcast payload failed to serialize");
                return;
            }
        };
        for addr in self.inner.monitors.values().cloned() {
            let engine = self.clone();
            let body = body.clone();
            tokio::spawn(async move {
                engine.inner.outbound.post(&addr, path, body).await;
            });
        }
    }

    /// Fire-and-forget POST of `payload` to one address.
    pub(crate) fn send_to<T: Serialize>(&self, addr: String, path: &'static str, payload: &T) {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, path, "payload failed to serialize");
                return;
            }
        };
        let engine = self.clone();
        tokio::spawn(async move {
            engine.inner.outbound.post(&addr, path, body).await;
        });
    }

    /// A conflict proof was observed on the PoM endpoint. Rebroadcast is
    /// future work; the proof is logged and dropped.
    pub fn handle_pom(&self, proof: ctng_core::ConflictProof) {
        debug!(entity = %proof.entity, "conflict proof observed");
    }

    /// Convergence records for every issuer FSM, loggers first.
    pub fn records(&self) -> Vec<ConvergenceRecord> {
        let monitor_id = self.inner.id.to_string();
        let mut records = Vec::new();
        for fsm in &self.inner.logger_fsms {
            let (traffic, updates) = fsm.counters();
            records.push(ConvergenceRecord {
                monitor_id: monitor_id.clone(),
                entity_id: fsm.id().to_string(),
                entity_type: "Logger".into(),
                converge_time: fsm.converge_seconds(),
                traffic: format_traffic(traffic),
                update_count: updates,
            });
        }
        for fsm in &self.inner.ca_fsms {
            let (traffic, updates) = fsm.counters();
            records.push(ConvergenceRecord {
                monitor_id: monitor_id.clone(),
                entity_id: fsm.id().to_string(),
                entity_type: "CA".into(),
                converge_time: fsm.converge_seconds(),
                traffic: format_traffic(traffic),
                update_count: updates,
            });
        }
        records
    }

    /// Write the convergence dump as `<monitor-id>.json` under `dir`.
    pub fn dump_records(&self, dir: impl AsRef<Path>) -> Result<PathBuf, MonitorError> {
        let path = dir.as_ref().join(format!("{}.json", self.inner.id));
        let raw = serde_json::to_vec_pretty(&self.records())?;
        std::fs::write(&path, raw)?;
        Ok(path)
    }
}
