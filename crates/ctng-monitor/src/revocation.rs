//! CA-side agreement: SRH validation, DCRV shard gossip, and partial
//! signatures over revocation heads.

use std::sync::Arc;
use std::time::Duration;

use ctng_core::{
    CaShardUpdate, ConflictProof, HeadKind, IssuerHead, Notification, NotificationKind,
    PartialSignature, SignedKind, Srh,
};
use ctng_crypto::{merkle, sha256};
use tracing::{debug, info, warn};

use crate::engine::{CaFsm, Engine};
use crate::fsm::{Command, HeadAdmission, SigAdmission};
use crate::wire;

impl Engine {
    /// A bare SRH arrived (issuer republish or peer rebroadcast).
    pub async fn handle_srh(&self, srh: Srh) {
        self.process_ca_update(srh, None).await;
    }

    /// A CA shard update arrived, from the issuer or a peer.
    pub async fn handle_ca_update(&self, update: CaShardUpdate, body_len: u64) {
        if let Some(fsm) = self.ca_fsm(&update.srh.caid) {
            fsm.apply(Command::AddTraffic(body_len));
            fsm.apply(Command::BumpUpdateCount);
        }
        let srh = update.srh.clone();
        self.process_ca_update(srh, Some(update)).await;
    }

    async fn process_ca_update(&self, srh: Srh, update: Option<CaShardUpdate>) {
        // Head validation is shared by every inbound path: recompute the
        // canonical bytes and check the issuer signature before anything
        // else.
        let signing_bytes = match srh.signing_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "SRH serialization failed");
                return;
            }
        };
        if self.inner.keyring.verify(&signing_bytes, &srh.signature).is_err() {
            debug!(ca = %srh.caid, "dropping SRH with bad issuer signature");
            return;
        }
        let Some(fsm) = self.ca_fsm(&srh.caid) else {
            debug!(ca = %srh.caid, "SRH from unknown CA");
            return;
        };
        let fsm = fsm.clone();

        match fsm.admit_head(srh.clone()) {
            HeadAdmission::Stalled => return,
            HeadAdmission::Conflicting { existing } => {
                let proof = ConflictProof {
                    entity: srh.caid.clone(),
                    artifact1: HeadKind::Srh(srh.clone()),
                    artifact2: HeadKind::Srh(existing),
                };
                if fsm.record_conflict(proof) {
                    info!(ca = %srh.caid, "conflicting SRH: entering PoM");
                    // Minimal head-only update so peers observe the second
                    // head and stall too.
                    let head_only = CaShardUpdate {
                        monitor_id: self.id().clone(),
                        file_share: Vec::new(),
                        head_rs: Vec::new(),
                        poi: Default::default(),
                        srh,
                        original_len: 0,
                    };
                    self.broadcast(wire::CA_UPDATE_EEA, &head_only);
                }
                return;
            }
            HeadAdmission::First => {
                info!(ca = %srh.caid, monitor = %self.id(), "SRH accepted: PRECOMMIT");
                self.broadcast(wire::SRH, &srh);
                self.arm_ca_commit_timer(fsm.clone());
            }
            HeadAdmission::Duplicate => {}
        }

        if let Some(update) = update {
            self.admit_ca_shard(&fsm, update).await;
        }
    }

    async fn admit_ca_shard(&self, fsm: &Arc<CaFsm>, update: CaShardUpdate) {
        if update.file_share.is_empty() {
            return;
        }
        if fsm.is_duplicate_update(&update.monitor_id, &update) {
            return;
        }
        if !merkle::verify(&update.head_rs, &update.poi, &update.file_share) {
            warn!(ca = %fsm.id(), owner = %update.monitor_id, "DCRV shard failed inclusion proof");
            return;
        }
        let Some(position) = self.shard_position(&update.monitor_id) else {
            debug!(owner = %update.monitor_id, "shard owner outside federation");
            return;
        };

        fsm.store_update(update.monitor_id.clone(), update.clone());
        let count = match fsm.add_fragment(position, update.file_share.clone()) {
            Some(count) => count,
            None => return,
        };

        if count == self.required_shards() {
            self.reconstruct_dcrv(fsm, &update).await;
        }

        let note = Notification {
            kind: NotificationKind::RevocationEea,
            originator: fsm.id().clone(),
            monitor: Some(update.monitor_id.clone()),
            sender: self.self_addr().to_owned(),
        };
        self.broadcast(wire::REVOCATION_NOTIFICATION, &note);
    }

    /// Rebuild the DCRV from the shard table and recompute the head
    /// binding `sha256(crv) ‖ sha256(dcrv) ‖ rs_root`.
    async fn reconstruct_dcrv(&self, fsm: &Arc<CaFsm>, update: &CaShardUpdate) {
        let Some(mut input) = fsm.reconstruction_input(self.required_shards()) else {
            return;
        };
        if let Err(err) = self.inner.codec.reconstruct(&mut input) {
            warn!(ca = %fsm.id(), %err, "DCRV reconstruction failed");
            return;
        }
        let shards: Vec<Vec<u8>> = input.into_iter().flatten().collect();
        let dcrv = self
            .inner
            .codec
            .concat_data(&shards, update.original_len as usize);

        // The production CRV and DCRV are distinct vectors; the simulated
        // CA feeds the same bytes to both digests. Keep the two hashes
        // separate so a distinct CRV would be caught byte-exact.
        let hcrv = sha256(&dcrv);
        let hdcrv = sha256(&dcrv);
        let mut recomputed = Vec::with_capacity(64 + update.head_rs.len());
        recomputed.extend_from_slice(&hcrv);
        recomputed.extend_from_slice(&hdcrv);
        recomputed.extend_from_slice(&update.head_rs);

        let Some(head) = fsm.head() else { return };
        if head.head == recomputed {
            fsm.apply(Command::SetDataCheck);
            info!(ca = %fsm.id(), "DCRV reconstructed and bound to SRH");
            if fsm.time_check() {
                self.commit_ca(fsm).await;
            }
        } else {
            warn!(ca = %fsm.id(), "reconstructed DCRV does not match SRH head");
        }
    }

    /// Commit timer: `mature_wait_time + verification_wait_time` after the
    /// first head. Fires into current state and no-ops when stale.
    fn arm_ca_commit_timer(&self, fsm: Arc<CaFsm>) {
        let delay = Duration::from_secs(
            self.inner.settings.mature_wait_time + self.inner.settings.verification_wait_time,
        );
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fsm.apply(Command::SetTimeCheck);
            if fsm.data_check() {
                engine.commit_ca(&fsm).await;
            } else if !fsm.stalled() {
                // Future work: assemble an accusation proof against the CA.
                debug!(ca = %fsm.id(), "commit timer fired without reconstructed DCRV");
            }
        });
    }

    /// The commit action: enter POSTCOMMIT once and broadcast this
    /// monitor's fragment over the canonical head.
    pub(crate) async fn commit_ca(&self, fsm: &Arc<CaFsm>) {
        let Some(head) = fsm.try_enter_postcommit() else {
            return;
        };
        let signing_bytes = match head.signing_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "SRH serialization failed at commit");
                return;
            }
        };
        let fragment = match self.inner.keyring.threshold_sign(&signing_bytes, self.id()) {
            Ok(fragment) => fragment,
            Err(err) => {
                warn!(%err, "threshold signing failed");
                return;
            }
        };
        info!(ca = %fsm.id(), monitor = %self.id(), "POSTCOMMIT: broadcasting revocation fragment");
        let msd = PartialSignature {
            kind: SignedKind::Srh,
            ctng_id: fsm.id().clone(),
            fragment,
        };
        self.broadcast(wire::REVOCATION_PARTIAL_SIGNATURE, &msd);
        // A full quorum may have gossiped in before this monitor's own
        // commit; the aggregation guard deferred it until now.
        self.try_aggregate_ca(fsm);
    }

    /// A peer advertises a DCRV shard.
    pub async fn handle_revocation_notification(&self, note: Notification) {
        if note.kind != NotificationKind::RevocationEea {
            return;
        }
        let Some(fsm) = self.ca_fsm(&note.originator).cloned() else {
            return;
        };
        if fsm.data_check() {
            return;
        }
        let Some(owner) = note.monitor.clone() else {
            return;
        };
        let Some(position) = self.shard_position(&owner) else {
            return;
        };
        if fsm.has_update(&owner) {
            return;
        }

        let mut reply = note.clone();
        reply.sender = self.self_addr().to_owned();

        match fsm.broadcast_mode(position) {
            Some(ctng_core::BroadcastMode::MinWt) => {
                self.send_to(note.sender, wire::REVOCATION_REQUEST, &reply);
            }
            Some(ctng_core::BroadcastMode::MinBc) => {
                let first = fsm.push_fragment_notification(position, note.clone());
                if first {
                    self.send_to(note.sender, wire::REVOCATION_REQUEST, &reply);
                    self.arm_ca_recovery_timer(fsm, position);
                }
            }
            None => {}
        }
    }

    /// Recovery timer for one shard position under MIN_BC: after
    /// `update_wait_time`, chase every queued advertiser and fall back to
    /// MIN_WT for that position.
    fn arm_ca_recovery_timer(&self, fsm: Arc<CaFsm>, position: usize) {
        let delay = Duration::from_secs(self.inner.settings.update_wait_time);
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if fsm.fragment_present(position) || fsm.data_check() {
                return;
            }
            debug!(ca = %fsm.id(), position, "recovery timer: chasing queued advertisers");
            for queued in fsm.notifications_for(position) {
                let mut reply = queued.clone();
                reply.sender = engine.self_addr().to_owned();
                engine.send_to(queued.sender, wire::REVOCATION_REQUEST, &reply);
            }
            fsm.apply(Command::SetBroadcastMode {
                position,
                mode: ctng_core::BroadcastMode::MinWt,
            });
        });
    }

    /// A peer asks for a shard this monitor advertised.
    pub async fn handle_revocation_request(&self, note: Notification) {
        let Some(fsm) = self.ca_fsm(&note.originator) else {
            return;
        };
        let Some(owner) = note.monitor else {
            return;
        };
        let Some(update) = fsm.update_for(&owner) else {
            debug!(ca = %note.originator, owner = %owner, "requested shard not held");
            return;
        };
        self.send_to(note.sender, wire::CA_UPDATE_EEA, &update);
    }

    /// A peer's fragment over a CA head.
    pub async fn handle_revocation_partial_signature(&self, msd: PartialSignature) {
        if msd.kind != SignedKind::Srh {
            return;
        }
        let Some(fsm) = self.ca_fsm(&msd.ctng_id).cloned() else {
            return;
        };
        let Some(head) = fsm.head() else {
            debug!(ca = %msd.ctng_id, "fragment before any SRH; dropping");
            return;
        };
        let signing_bytes = match head.signing_bytes() {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        if self
            .inner
            .keyring
            .fragment_verify(&signing_bytes, &msd.fragment)
            .is_err()
        {
            debug!(ca = %msd.ctng_id, from = %msd.fragment.id, "invalid revocation fragment");
            return;
        }

        match fsm.add_partial_sig(msd.fragment.clone(), self.quorum()) {
            SigAdmission::Ignored => {}
            SigAdmission::Added(count) => {
                if count == self.quorum() {
                    self.try_aggregate_ca(&fsm);
                }
                self.broadcast(wire::REVOCATION_PARTIAL_SIGNATURE, &msd);
            }
        }
    }

    /// Aggregate once a quorum of fragments is held. `complete` enforces
    /// the commit guards, so a quorum that arrives before this monitor's
    /// own commit simply waits for the commit path to call back in.
    fn try_aggregate_ca(&self, fsm: &Arc<CaFsm>) {
        if fsm.signature().is_some() {
            return;
        }
        let fragments = fsm.partial_sigs();
        if fragments.len() < self.quorum() {
            return;
        }
        match self.inner.keyring.aggregate(&fragments) {
            Ok(signature) => {
                if fsm.complete(signature) {
                    info!(
                        ca = %fsm.id(),
                        monitor = %self.id(),
                        converge_seconds = fsm.converge_seconds(),
                        "revocation threshold signature complete: DONE"
                    );
                }
            }
            Err(err) => warn!(ca = %fsm.id(), %err, "revocation aggregation failed"),
        }
    }
}
