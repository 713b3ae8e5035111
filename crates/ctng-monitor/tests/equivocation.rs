//! Equivocation scenarios: one issuer, two validly signed heads.

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use common::{topology, wait_for, TestNet};
use ctng_core::{
    BroadcastMode, CtngId, DistributionMode, HeadKind, IssuerHead, IssuerSignature, Sth,
};
use ctng_crypto::Keyring;
use ctng_monitor::State;

fn lid() -> CtngId {
    "L1".parse().unwrap()
}

fn signed_sth(keyring: &Keyring, head_byte: u8) -> Sth {
    let mut sth = Sth {
        lid: lid(),
        period: 1,
        size: 8,
        timestamp: "2025-06-01T00:00:00Z".into(),
        head: vec![head_byte; 32],
        signature: IssuerSignature::default(),
    };
    let bytes = sth.signing_bytes().unwrap();
    sth.signature = keyring.sign(&bytes, &lid()).unwrap();
    sth
}

/// Two distinct validly signed STHs reach disjoint monitor pairs; the
/// cross-broadcast spreads the second head and every monitor lands in PoM
/// with the same conflict pair. Nobody ever reaches DONE.
#[tokio::test(flavor = "multi_thread")]
async fn split_heads_drive_every_monitor_to_pom() {
    let net = TestNet::start(
        &topology(4, 1, DistributionMode::Eea, BroadcastMode::MinWt),
        6,
    );
    let head_a = signed_sth(&net.keyring, 0xAA);
    let head_b = signed_sth(&net.keyring, 0xBB);

    for id in ["M1", "M2"] {
        net.engine(id).handle_sth(head_a.clone()).await;
    }
    for id in ["M3", "M4"] {
        net.engine(id).handle_sth(head_b.clone()).await;
    }

    let all_pom = wait_for(Duration::from_secs(5), || {
        net.engines
            .iter()
            .all(|e| e.logger_fsm(&lid()).unwrap().state() == State::Pom)
    })
    .await;
    assert!(all_pom, "not every monitor entered PoM");

    // Identical conflict content everywhere, up to artifact ordering.
    let expected: BTreeSet<Vec<u8>> = [&head_a, &head_b]
        .iter()
        .map(|sth| serde_json::to_vec(sth).unwrap())
        .collect();
    for engine in &net.engines {
        let fsm = engine.logger_fsm(&lid()).unwrap();
        let proof = fsm.conflict().expect("conflict proof missing");
        assert_eq!(proof.entity, lid());
        let pair: BTreeSet<Vec<u8>> = [&proof.artifact1, &proof.artifact2]
            .iter()
            .map(|artifact| match artifact {
                HeadKind::Sth(sth) => serde_json::to_vec(sth).unwrap(),
                HeadKind::Srh(srh) => serde_json::to_vec(srh).unwrap(),
            })
            .collect();
        assert_eq!(pair, expected);
    }

    // Past every timer: a stalled FSM never signs.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    for engine in &net.engines {
        let fsm = engine.logger_fsm(&lid()).unwrap();
        assert_eq!(fsm.state(), State::Pom);
        assert!(fsm.signature().is_none());
    }
}

/// A replay of the same head is not equivocation.
#[tokio::test(flavor = "multi_thread")]
async fn duplicate_head_does_not_conflict() {
    let net = TestNet::start(
        &topology(4, 1, DistributionMode::Eea, BroadcastMode::MinWt),
        7,
    );
    let head = signed_sth(&net.keyring, 0xCC);

    net.engine("M1").handle_sth(head.clone()).await;
    net.engine("M1").handle_sth(head.clone()).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let fsm = net.engine("M1").logger_fsm(&lid()).unwrap();
    assert_eq!(fsm.state(), State::Precommit);
    assert!(fsm.conflict().is_none());
}
