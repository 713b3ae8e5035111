//! In-process test network: several engines wired together through a
//! loopback transport, no HTTP involved.

// Each integration-test binary uses a different slice of this harness.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ctng_core::config::TopologyParams;
use ctng_core::{BroadcastMode, CtngId, DistributionMode, Role, Settings};
use ctng_crypto::Keyring;
use ctng_monitor::{wire, Engine, Outbound};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;

/// One delivered message, for traffic assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub from: String,
    pub to: String,
    pub path: String,
}

type Inbox = mpsc::UnboundedSender<(String, Vec<u8>)>;

/// Shared loopback fabric: address → inbox, plus a send log.
#[derive(Default)]
pub struct Fabric {
    routes: Mutex<BTreeMap<String, Inbox>>,
    pub log: Mutex<Vec<Sent>>,
}

impl Fabric {
    pub fn sent(&self) -> Vec<Sent> {
        self.log.lock().unwrap().clone()
    }

    pub fn requests_from(&self, addr: &str, path: &str) -> usize {
        self.sent()
            .iter()
            .filter(|s| s.from == addr && s.path == path)
            .count()
    }
}

/// Per-engine outbound handle over the shared fabric.
pub struct LoopbackOutbound {
    fabric: Arc<Fabric>,
    from: String,
}

#[async_trait]
impl Outbound for LoopbackOutbound {
    async fn post(&self, addr: &str, path: &str, body: Vec<u8>) {
        self.fabric.log.lock().unwrap().push(Sent {
            from: self.from.clone(),
            to: addr.to_owned(),
            path: path.to_owned(),
        });
        let inbox = self.fabric.routes.lock().unwrap().get(addr).cloned();
        if let Some(inbox) = inbox {
            let _ = inbox.send((path.to_owned(), body));
        }
    }
}

/// Route one inbound message into the engine, mirroring the HTTP router.
async fn dispatch(engine: &Engine, path: &str, body: &[u8]) {
    let len = body.len() as u64;
    match path {
        wire::CA_UPDATE_EEA => {
            if let Ok(update) = serde_json::from_slice(body) {
                engine.handle_ca_update(update, len).await;
            }
        }
        wire::SRH => {
            if let Ok(srh) = serde_json::from_slice(body) {
                engine.handle_srh(srh).await;
            }
        }
        wire::REVOCATION_NOTIFICATION => {
            if let Ok(note) = serde_json::from_slice(body) {
                engine.handle_revocation_notification(note).await;
            }
        }
        wire::REVOCATION_REQUEST => {
            if let Ok(note) = serde_json::from_slice(body) {
                engine.handle_revocation_request(note).await;
            }
        }
        wire::REVOCATION_PARTIAL_SIGNATURE => {
            if let Ok(msd) = serde_json::from_slice(body) {
                engine.handle_revocation_partial_signature(msd).await;
            }
        }
        wire::LOGGER_UPDATE_EEA => {
            if let Ok(update) = serde_json::from_slice(body) {
                engine.handle_logger_update_eea(update, len).await;
            }
        }
        wire::LOGGER_UPDATE => {
            if let Ok(update) = serde_json::from_slice(body) {
                engine.handle_logger_update(update, len).await;
            }
        }
        wire::STH => {
            if let Ok(sth) = serde_json::from_slice(body) {
                engine.handle_sth(sth).await;
            }
        }
        wire::TRANSPARENCY_NOTIFICATION => {
            if let Ok(note) = serde_json::from_slice(body) {
                engine.handle_transparency_notification(note).await;
            }
        }
        wire::TRANSPARENCY_REQUEST => {
            if let Ok(note) = serde_json::from_slice(body) {
                engine.handle_transparency_request(note).await;
            }
        }
        wire::TRANSPARENCY_PARTIAL_SIGNATURE => {
            if let Ok(msd) = serde_json::from_slice(body) {
                engine.handle_transparency_partial_signature(msd).await;
            }
        }
        _ => {}
    }
}

/// A federation of in-process monitors plus the shared key material.
pub struct TestNet {
    pub settings: Settings,
    pub keyring: Keyring,
    pub engines: Vec<Engine>,
    pub fabric: Arc<Fabric>,
}

pub fn topology(
    num_monitors: usize,
    mal: usize,
    dmode: DistributionMode,
    bmode: BroadcastMode,
) -> TopologyParams {
    TopologyParams {
        num_cas: 1,
        num_loggers: 1,
        num_monitors,
        mal,
        ca_mask: "127.0.0.".into(),
        ca_offset: 1,
        logger_mask: "127.0.0.".into(),
        logger_offset: 1,
        monitor_mask: "127.0.0.".into(),
        monitor_offset: 1,
        starting_port: 9000,
        update_wait_time: 1,
        mature_wait_time: 0,
        response_wait_time: 1,
        verification_wait_time: 1,
        mud: 30,
        distribution_mode: dmode,
        broadcasting_mode: bmode,
        crv_size: 4096,
        revocation_ratio: 0.05,
        certificate_size: 64,
        certificate_per_logger: 8,
    }
}

impl TestNet {
    /// Spin up every monitor engine with a pump task draining its inbox.
    pub fn start(params: &TopologyParams, seed: u64) -> Self {
        let settings = Settings::from_topology(params);
        let mut rng = StdRng::seed_from_u64(seed);
        let keyring = Keyring::generate(
            params.num_cas,
            params.num_loggers,
            params.num_monitors,
            params.mal + 1,
            &mut rng,
        )
        .unwrap();

        let fabric = Arc::new(Fabric::default());
        let mut engines = Vec::new();
        for id in settings.ids(Role::Monitor) {
            let addr = settings.address_of(&id).unwrap();
            let outbound = LoopbackOutbound {
                fabric: fabric.clone(),
                from: addr.clone(),
            };
            let engine = Engine::new(
                id,
                settings.clone(),
                keyring.clone(),
                Box::new(outbound),
            )
            .unwrap();

            let (tx, mut rx) = mpsc::unbounded_channel();
            fabric.routes.lock().unwrap().insert(addr, tx);
            let pump = engine.clone();
            tokio::spawn(async move {
                while let Some((path, body)) = rx.recv().await {
                    dispatch(&pump, &path, &body).await;
                }
            });
            engines.push(engine);
        }

        TestNet {
            settings,
            keyring,
            engines,
            fabric,
        }
    }

    pub fn engine(&self, id: &str) -> &Engine {
        let id: CtngId = id.parse().unwrap();
        self.engines
            .iter()
            .find(|e| e.id() == &id)
            .expect("unknown engine")
    }
}

/// Poll until `condition` holds or `deadline` elapses.
pub async fn wait_for(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}
