//! Logger-side agreement: STH validation, certificate shard gossip (EEA),
//! full-file distribution (default mode), and partial signatures over tree
//! heads.

use std::sync::Arc;
use std::time::Duration;

use ctng_core::{
    ConflictProof, DistributionMode, HeadKind, IssuerHead, LoggerFullUpdate, LoggerShardUpdate,
    Notification, NotificationKind, PartialSignature, SignedKind, Sth,
};
use ctng_crypto::{merkle, MerkleTree};
use tracing::{debug, info, warn};

use crate::engine::{Engine, LoggerFsm};
use crate::fsm::{Command, HeadAdmission, SigAdmission};
use crate::wire;

impl Engine {
    /// A bare STH arrived (peer rebroadcast).
    pub async fn handle_sth(&self, sth: Sth) {
        let _ = self.admit_logger_head(sth);
    }

    /// A logger shard update arrived, from the issuer or a peer.
    pub async fn handle_logger_update_eea(&self, update: LoggerShardUpdate, body_len: u64) {
        if let Some(fsm) = self.logger_fsm(&update.sth.lid) {
            fsm.apply(Command::AddTraffic(body_len));
            fsm.apply(Command::BumpUpdateCount);
        }
        let Some(fsm) = self.admit_logger_head(update.sth.clone()) else {
            return;
        };
        self.admit_logger_shard(&fsm, update).await;
    }

    /// Default-mode logger update: the full certificate block list.
    pub async fn handle_logger_update(&self, update: LoggerFullUpdate, body_len: u64) {
        if let Some(fsm) = self.logger_fsm(&update.sth.lid) {
            fsm.apply(Command::AddTraffic(body_len));
            if !update.file.is_empty() {
                fsm.apply(Command::BumpUpdateCount);
            }
        }
        let Some(fsm) = self.admit_logger_head(update.sth.clone()) else {
            return;
        };
        if update.file.is_empty() || fsm.has_full_file() {
            return;
        }

        // Default-mode binding: the STH head is the Merkle root over the
        // certificate blocks themselves.
        let Some(tree) = MerkleTree::build(&update.file) else {
            return;
        };
        let Some(head) = fsm.head() else { return };
        if head.head != tree.root() {
            warn!(logger = %fsm.id(), "full file does not match STH head");
            return;
        }
        fsm.apply(Command::StoreFullFile(update.file));
        fsm.apply(Command::SetDataCheck);
        info!(logger = %fsm.id(), "full certificate file verified");

        let note = Notification {
            kind: NotificationKind::Transparency,
            originator: fsm.id().clone(),
            monitor: None,
            sender: self.self_addr().to_owned(),
        };
        self.broadcast(wire::TRANSPARENCY_NOTIFICATION, &note);

        if fsm.time_check() {
            self.commit_logger(&fsm).await;
        }
    }

    /// Shared head validation: verify the issuer signature, then run head
    /// admission. Returns the FSM when the caller may continue with
    /// payload processing (first or duplicate head), `None` on drop,
    /// conflict, or stall.
    fn admit_logger_head(&self, sth: Sth) -> Option<Arc<LoggerFsm>> {
        let signing_bytes = match sth.signing_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "STH serialization failed");
                return None;
            }
        };
        if self.inner.keyring.verify(&signing_bytes, &sth.signature).is_err() {
            debug!(logger = %sth.lid, "dropping STH with bad issuer signature");
            return None;
        }
        let fsm = self.logger_fsm(&sth.lid)?.clone();

        match fsm.admit_head(sth.clone()) {
            HeadAdmission::Stalled => None,
            HeadAdmission::Conflicting { existing } => {
                let proof = ConflictProof {
                    entity: sth.lid.clone(),
                    artifact1: HeadKind::Sth(sth.clone()),
                    artifact2: HeadKind::Sth(existing),
                };
                if fsm.record_conflict(proof) {
                    info!(logger = %sth.lid, "conflicting STH: entering PoM");
                    let head_only = LoggerFullUpdate {
                        sth,
                        file: Vec::new(),
                    };
                    self.broadcast(wire::LOGGER_UPDATE, &head_only);
                }
                None
            }
            HeadAdmission::First => {
                info!(logger = %sth.lid, monitor = %self.id(), "STH accepted: PRECOMMIT");
                match self.settings().distribution_mode {
                    DistributionMode::Eea => self.broadcast(wire::STH, &sth),
                    DistributionMode::Default => {
                        let head_only = LoggerFullUpdate {
                            sth,
                            file: Vec::new(),
                        };
                        self.broadcast(wire::LOGGER_UPDATE, &head_only);
                    }
                }
                self.arm_logger_commit_timer(fsm.clone());
                Some(fsm)
            }
            HeadAdmission::Duplicate => Some(fsm),
        }
    }

    async fn admit_logger_shard(&self, fsm: &Arc<LoggerFsm>, update: LoggerShardUpdate) {
        if update.file_share.is_empty() {
            return;
        }
        if fsm.is_duplicate_update(&update.monitor_id, &update) {
            return;
        }
        if !merkle::verify(&update.head_rs, &update.poi, &update.file_share) {
            warn!(logger = %fsm.id(), owner = %update.monitor_id, "certificate shard failed inclusion proof");
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
            self.reconstruct_batch(fsm, &update).await;
        }

        let note = Notification {
            kind: NotificationKind::TransparencyEea,
            originator: fsm.id().clone(),
            monitor: Some(update.monitor_id.clone()),
            sender: self.self_addr().to_owned(),
        };
        self.broadcast(wire::TRANSPARENCY_NOTIFICATION, &note);
    }

    /// Rebuild the certificate batch from the shard table and recompute
    /// the EEA binding: the certificate-tree root must match the carried
    /// `head_cert`, and the root over `{rs_root, cert_root}` must equal
    /// the signed STH head.
    async fn reconstruct_batch(&self, fsm: &Arc<LoggerFsm>, update: &LoggerShardUpdate) {
        let Some(mut input) = fsm.reconstruction_input(self.required_shards()) else {
            return;
        };
        if let Err(err) = self.inner.codec.reconstruct(&mut input) {
            warn!(logger = %fsm.id(), %err, "certificate reconstruction failed");
            return;
        }
        let shards: Vec<Vec<u8>> = input.into_iter().flatten().collect();

        // Re-chunk the data shards into certificate blocks exactly the way
        // the logger built them.
        let block_size = self.settings().certificate_size.max(1);
        let mut blocks = Vec::new();
        for shard in shards.iter().take(self.required_shards()) {
            for chunk in shard.chunks(block_size) {
                blocks.push(chunk.to_vec());
            }
        }
        let Some(cert_tree) = MerkleTree::build(&blocks) else {
            return;
        };
        let cert_root = cert_tree.root();

        let Some(head) = fsm.head() else { return };
        let combined =
            MerkleTree::build(&[update.head_rs.clone(), cert_root.to_vec()]).map(|t| t.root());

        if cert_root[..] == update.head_cert[..] && combined.is_some_and(|c| c[..] == head.head[..])
        {
            fsm.apply(Command::SetDataCheck);
            info!(logger = %fsm.id(), "certificate batch reconstructed and bound to STH");
            if fsm.time_check() {
                self.commit_logger(fsm).await;
            }
        } else {
            warn!(logger = %fsm.id(), "reconstructed batch does not match STH head");
        }
    }

    /// Commit timer: `verification_wait_time` after the first head.
    fn arm_logger_commit_timer(&self, fsm: Arc<LoggerFsm>) {
        let delay = Duration::from_secs(self.inner.settings.verification_wait_time);
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fsm.apply(Command::SetTimeCheck);
            if fsm.data_check() {
                engine.commit_logger(&fsm).await;
            } else if !fsm.stalled() {
                // Future work: assemble an accusation proof against the
                // logger.
                debug!(logger = %fsm.id(), "commit timer fired without verified batch");
            }
        });
    }

    /// The commit action for a logger head.
    pub(crate) async fn commit_logger(&self, fsm: &Arc<LoggerFsm>) {
        let Some(head) = fsm.try_enter_postcommit() else {
            return;
        };
        let signing_bytes = match head.signing_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "STH serialization failed at commit");
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
        info!(logger = %fsm.id(), monitor = %self.id(), "POSTCOMMIT: broadcasting transparency fragment");
        let msd = PartialSignature {
            kind: SignedKind::Sth,
            ctng_id: fsm.id().clone(),
            fragment,
        };
        self.broadcast(wire::TRANSPARENCY_PARTIAL_SIGNATURE, &msd);
        // A full quorum may have gossiped in before this monitor's own
        // commit; the aggregation guard deferred it until now.
        self.try_aggregate_logger(fsm);
    }

    /// A peer advertises a certificate shard (EEA) or the full file
    /// (default mode).
    pub async fn handle_transparency_notification(&self, note: Notification) {
        let Some(fsm) = self.logger_fsm(&note.originator).cloned() else {
            return;
        };
        if fsm.data_check() {
            return;
        }
        let mut reply = note.clone();
        reply.sender = self.self_addr().to_owned();

        match note.kind {
            NotificationKind::Transparency => {
                // Full-file offer: always chase immediately.
                if !fsm.has_full_file() {
                    self.send_to(note.sender, wire::TRANSPARENCY_REQUEST, &reply);
                }
            }
            NotificationKind::TransparencyEea => {
                let Some(owner) = note.monitor.clone() else {
                    return;
                };
                let Some(position) = self.shard_position(&owner) else {
                    return;
                };
                if fsm.has_update(&owner) {
                    return;
                }
                match fsm.broadcast_mode(position) {
                    Some(ctng_core::BroadcastMode::MinWt) => {
                        self.send_to(note.sender, wire::TRANSPARENCY_REQUEST, &reply);
                    }
                    Some(ctng_core::BroadcastMode::MinBc) => {
                        let first = fsm.push_fragment_notification(position, note.clone());
                        if first {
                            self.send_to(note.sender, wire::TRANSPARENCY_REQUEST, &reply);
                            self.arm_logger_recovery_timer(fsm, position);
                        }
                    }
                    None => {}
                }
            }
            _ => {}
        }
    }

    /// Recovery timer for one shard position under MIN_BC: after
    /// `response_wait_time`, chase every queued advertiser and fall back
    /// to MIN_WT for that position.
    fn arm_logger_recovery_timer(&self, fsm: Arc<LoggerFsm>, position: usize) {
        let delay = Duration::from_secs(self.inner.settings.response_wait_time);
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if fsm.fragment_present(position) || fsm.data_check() {
                return;
            }
            debug!(logger = %fsm.id(), position, "recovery timer: chasing queued advertisers");
            for queued in fsm.notifications_for(position) {
                let mut reply = queued.clone();
                reply.sender = engine.self_addr().to_owned();
                engine.send_to(queued.sender, wire::TRANSPARENCY_REQUEST, &reply);
            }
            fsm.apply(Command::SetBroadcastMode {
                position,
                mode: ctng_core::BroadcastMode::MinWt,
            });
        });
    }

    /// A peer asks for a shard or the full file this monitor advertised.
    pub async fn handle_transparency_request(&self, note: Notification) {
        let Some(fsm) = self.logger_fsm(&note.originator) else {
            return;
        };
        match note.kind {
            NotificationKind::Transparency => {
                let Some(sth) = fsm.head() else { return };
                let file = fsm.full_file();
                if file.is_empty() {
                    return;
                }
                let update = LoggerFullUpdate { sth, file };
                self.send_to(note.sender, wire::LOGGER_UPDATE, &update);
            }
            NotificationKind::TransparencyEea => {
                let Some(owner) = note.monitor else {
                    return;
                };
                let Some(update) = fsm.update_for(&owner) else {
                    debug!(logger = %note.originator, owner = %owner, "requested shard not held");
                    return;
                };
                self.send_to(note.sender, wire::LOGGER_UPDATE_EEA, &update);
            }
            _ => {}
        }
    }

    /// A peer's fragment over a logger head.
    pub async fn handle_transparency_partial_signature(&self, msd: PartialSignature) {
        if msd.kind != SignedKind::Sth {
            return;
        }
        let Some(fsm) = self.logger_fsm(&msd.ctng_id).cloned() else {
            return;
        };
        let Some(head) = fsm.head() else {
            debug!(logger = %msd.ctng_id, "fragment before any STH; dropping");
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
            debug!(logger = %msd.ctng_id, from = %msd.fragment.id, "invalid transparency fragment");
            return;
        }

        match fsm.add_partial_sig(msd.fragment.clone(), self.quorum()) {
            SigAdmission::Ignored => {}
            SigAdmission::Added(count) => {
                if count == self.quorum() {
                    self.try_aggregate_logger(&fsm);
                }
                self.broadcast(wire::TRANSPARENCY_PARTIAL_SIGNATURE, &msd);
            }
        }
    }

    /// Aggregate once a quorum of fragments is held. `complete` enforces
    /// the commit guards, so a quorum that arrives before this monitor's
    /// own commit simply waits for the commit path to call back in.
    fn try_aggregate_logger(&self, fsm: &Arc<LoggerFsm>) {
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
                        logger = %fsm.id(),
                        monitor = %self.id(),
                        converge_seconds = fsm.converge_seconds(),
                        "transparency threshold signature complete: DONE"
                    );
                }
            }
            Err(err) => warn!(logger = %fsm.id(), %err, "transparency aggregation failed"),
        }
    }
}
