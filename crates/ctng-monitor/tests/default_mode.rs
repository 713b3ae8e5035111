//! Default distribution mode: the full certificate file reaches every
//! monitor directly and no shard gossip occurs.

mod common;

use std::time::Duration;

use common::{topology, wait_for, TestNet};
use ctng_core::{BroadcastMode, CtngId, DistributionMode, IssuerHead};
use ctng_logger::Logger;
use ctng_monitor::{wire, State};

fn lid() -> CtngId {
    "L1".parse().unwrap()
}

/// S4: full-file delivery to all monitors, DONE after the verification
/// wait, and not a single shard message on the wire.
#[tokio::test(flavor = "multi_thread")]
async fn full_file_delivery_converges_without_shards() {
    let net = TestNet::start(
        &topology(4, 1, DistributionMode::Default, BroadcastMode::MinWt),
        8,
    );
    let logger = Logger::new(lid(), net.keyring.clone(), net.settings.clone()).unwrap();
    let update = logger.generate_update().unwrap();

    for engine in &net.engines {
        let len = serde_json::to_vec(&update.full_update).unwrap().len() as u64;
        engine
            .handle_logger_update(update.full_update.clone(), len)
            .await;
    }

    let all_done = wait_for(Duration::from_secs(10), || {
        net.engines
            .iter()
            .all(|e| e.logger_fsm(&lid()).unwrap().state() == State::Done)
    })
    .await;
    assert!(all_done, "not every monitor reached DONE");

    let signing_bytes = update.full_update.sth.signing_bytes().unwrap();
    for engine in &net.engines {
        let fsm = engine.logger_fsm(&lid()).unwrap();
        assert!(fsm.data_check());
        net.keyring
            .threshold_verify(&signing_bytes, &fsm.signature().unwrap())
            .unwrap();
    }

    // No erasure-coded traffic at all in default mode.
    for sent in net.fabric.sent() {
        assert_ne!(sent.path, wire::LOGGER_UPDATE_EEA);
        assert_ne!(sent.path, wire::TRANSPARENCY_REQUEST);
    }
}

/// A monitor that only got the head recovers the full file from a peer's
/// notification.
#[tokio::test(flavor = "multi_thread")]
async fn head_only_monitor_pulls_full_file_from_peer() {
    let net = TestNet::start(
        &topology(4, 1, DistributionMode::Default, BroadcastMode::MinWt),
        9,
    );
    let logger = Logger::new(lid(), net.keyring.clone(), net.settings.clone()).unwrap();
    let update = logger.generate_update().unwrap();

    // Only M1 receives the file; M2..M4 learn the head from M1's
    // rebroadcast and chase the file offer.
    let len = serde_json::to_vec(&update.full_update).unwrap().len() as u64;
    net.engine("M1")
        .handle_logger_update(update.full_update.clone(), len)
        .await;

    let all_done = wait_for(Duration::from_secs(10), || {
        net.engines
            .iter()
            .all(|e| e.logger_fsm(&lid()).unwrap().state() == State::Done)
    })
    .await;
    assert!(all_done, "file offer gossip did not converge");
}
