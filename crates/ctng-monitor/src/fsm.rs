//! Per-issuer agreement state machines.
//!
//! One [`IssuerFsm`] exists per known issuer for the lifetime of the
//! monitor process. All mutation goes through a reader-writer lock with
//! short critical sections: simple writes are a closed [`Command`]
//! enumeration applied under one lock acquisition, and the compound
//! admissions (head, shard, partial signature) are typed methods that make
//! their read-decide-write step atomically under the same lock.
//!
//! No lock is ever held across I/O; callers take a decision out of the FSM
//! and perform broadcasts afterwards.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use ctng_core::{
    AccusationProof, BroadcastMode, ConflictProof, CtngId, IssuerHead, Notification,
    SignatureFragment, ThresholdSignature,
};
use parking_lot::RwLock;

/// Agreement progress for one issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Precommit,
    Postcommit,
    Done,
    Pom,
}

/// Simple state writes, applied atomically by [`IssuerFsm::apply`].
#[derive(Debug, Clone)]
pub enum Command {
    SetState(State),
    SetTimeCheck,
    SetDataCheck,
    SetBroadcastMode { position: usize, mode: BroadcastMode },
    AddTraffic(u64),
    BumpUpdateCount,
    StoreFullFile(Vec<Vec<u8>>),
}

/// Outcome of offering a validated head to the FSM.
#[derive(Debug)]
pub enum HeadAdmission<H> {
    /// First head for this issuer; the caller broadcasts it and arms the
    /// commit timer.
    First,
    /// Byte-identical to the stored head.
    Duplicate,
    /// Distinct from the stored head: equivocation. Carries the head
    /// already on record so the caller can assemble a conflict proof.
    Conflicting { existing: H },
    /// A proof of misbehavior is already recorded; no further progress.
    Stalled,
}

/// Outcome of offering a partial signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigAdmission {
    /// Appended; holds the new list length.
    Added(usize),
    /// Fragment already present, signature already complete, quorum
    /// already full, or the FSM is stalled in PoM.
    Ignored,
}

struct FsmState<H, U> {
    state: State,
    head: Option<H>,
    updates: BTreeMap<CtngId, U>,
    /// By-position shard storage; an empty entry is a missing shard.
    fragments: Vec<Vec<u8>>,
    fragment_count: usize,
    fragment_bmode: Vec<BroadcastMode>,
    fragment_notifications: Vec<Vec<Notification>>,
    /// Default-mode full artifact (certificate block list).
    full_file: Vec<Vec<u8>>,
    data_check: bool,
    time_check: bool,
    partial_sigs: Vec<SignatureFragment>,
    signature: Option<ThresholdSignature>,
    cpom: Option<ConflictProof>,
    apom: Option<AccusationProof>,
    converge_time: Option<Duration>,
    traffic_bytes: u64,
    update_count: u64,
}

/// Per-issuer state machine, shared across handler tasks and timers.
pub struct IssuerFsm<H, U> {
    id: CtngId,
    period: u32,
    start: Instant,
    inner: RwLock<FsmState<H, U>>,
}

impl<H, U> IssuerFsm<H, U>
where
    H: IssuerHead,
    U: Clone + PartialEq,
{
    /// Create the FSM for one issuer with `positions` shard slots.
    pub fn new(id: CtngId, period: u32, positions: usize, mode: BroadcastMode) -> Self {
        IssuerFsm {
            id,
            period,
            start: Instant::now(),
            inner: RwLock::new(FsmState {
                state: State::Init,
                head: None,
                updates: BTreeMap::new(),
                fragments: vec![Vec::new(); positions],
                fragment_count: 0,
                fragment_bmode: vec![mode; positions],
                fragment_notifications: vec![Vec::new(); positions],
                full_file: Vec::new(),
                data_check: false,
                time_check: false,
                partial_sigs: Vec::new(),
                signature: None,
                cpom: None,
                apom: None,
                converge_time: None,
                traffic_bytes: 0,
                update_count: 0,
            }),
        }
    }

    /// The issuer this FSM tracks.
    pub fn id(&self) -> &CtngId {
        &self.id
    }

    /// The period this FSM tracks.
    pub fn period(&self) -> u32 {
        self.period
    }

    /// Apply one simple write.
    pub fn apply(&self, command: Command) {
        let mut s = self.inner.write();
        match command {
            Command::SetState(state) => s.state = state,
            Command::SetTimeCheck => s.time_check = true,
            Command::SetDataCheck => s.data_check = true,
            Command::SetBroadcastMode { position, mode } => {
                if let Some(slot) = s.fragment_bmode.get_mut(position) {
                    *slot = mode;
                }
            }
            Command::AddTraffic(bytes) => s.traffic_bytes += bytes,
            Command::BumpUpdateCount => s.update_count += 1,
            Command::StoreFullFile(file) => s.full_file = file,
        }
    }

    // --- head admission -------------------------------------------------

    /// Offer a validated head. Stores it and enters PRECOMMIT when it is
    /// the first; reports equivocation when it differs from the record.
    pub fn admit_head(&self, head: H) -> HeadAdmission<H> {
        let mut s = self.inner.write();
        if s.cpom.is_some() || s.apom.is_some() {
            return HeadAdmission::Stalled;
        }
        match &s.head {
            None => {
                s.head = Some(head);
                s.state = State::Precommit;
                HeadAdmission::First
            }
            Some(existing) if *existing == head => HeadAdmission::Duplicate,
            Some(existing) => HeadAdmission::Conflicting {
                existing: existing.clone(),
            },
        }
    }

    /// Record a conflict proof. First writer wins; the winner's FSM enters
    /// PoM atomically with the admission.
    pub fn record_conflict(&self, proof: ConflictProof) -> bool {
        let mut s = self.inner.write();
        if s.cpom.is_some() {
            return false;
        }
        s.cpom = Some(proof);
        s.state = State::Pom;
        true
    }

    /// Record an accusation proof. First writer wins.
    pub fn record_accusation(&self, proof: AccusationProof) -> bool {
        let mut s = self.inner.write();
        if s.apom.is_some() {
            return false;
        }
        s.apom = Some(proof);
        s.state = State::Pom;
        true
    }

    // --- shard admission ------------------------------------------------

    /// True when an identical update from this monitor is already stored.
    pub fn is_duplicate_update(&self, monitor: &CtngId, update: &U) -> bool {
        self.inner.read().updates.get(monitor) == Some(update)
    }

    /// True when any update from this monitor is stored.
    pub fn has_update(&self, monitor: &CtngId) -> bool {
        self.inner.read().updates.contains_key(monitor)
    }

    /// The stored update from one monitor, if any.
    pub fn update_for(&self, monitor: &CtngId) -> Option<U> {
        self.inner.read().updates.get(monitor).cloned()
    }

    /// Store the most recent update from a monitor.
    pub fn store_update(&self, monitor: CtngId, update: U) {
        self.inner.write().updates.insert(monitor, update);
    }

    /// Place a shard at its position. The count grows only when a
    /// non-empty shard fills a previously empty slot; returns the count
    /// after the attempt, or `None` for an out-of-range position.
    pub fn add_fragment(&self, position: usize, shard: Vec<u8>) -> Option<usize> {
        let mut s = self.inner.write();
        let slot = s.fragments.get_mut(position)?;
        if !shard.is_empty() && slot.is_empty() {
            *slot = shard;
            s.fragment_count += 1;
        }
        Some(s.fragment_count)
    }

    /// True when the position holds a shard.
    pub fn fragment_present(&self, position: usize) -> bool {
        self.inner
            .read()
            .fragments
            .get(position)
            .is_some_and(|f| !f.is_empty())
    }

    /// Snapshot the shard table for reconstruction, or `None` when the
    /// artifact is already verified or the quorum of shards is not there
    /// yet. The `data_check` guard makes repeated triggers idempotent.
    pub fn reconstruction_input(&self, required: usize) -> Option<Vec<Option<Vec<u8>>>> {
        let s = self.inner.read();
        if s.data_check || s.fragment_count < required {
            return None;
        }
        Some(
            s.fragments
                .iter()
                .map(|f| (!f.is_empty()).then(|| f.clone()))
                .collect(),
        )
    }

    // --- notifications --------------------------------------------------

    /// Queue a notification for a shard position. Returns true when it is
    /// the first for that position (the MIN_BC request trigger).
    pub fn push_fragment_notification(&self, position: usize, note: Notification) -> bool {
        let mut s = self.inner.write();
        match s.fragment_notifications.get_mut(position) {
            Some(queue) => {
                let first = queue.is_empty();
                if !queue.contains(&note) {
                    queue.push(note);
                }
                first
            }
            None => false,
        }
    }

    /// All queued notifications for a position.
    pub fn notifications_for(&self, position: usize) -> Vec<Notification> {
        self.inner
            .read()
            .fragment_notifications
            .get(position)
            .cloned()
            .unwrap_or_default()
    }

    /// The broadcast discipline currently governing a position.
    pub fn broadcast_mode(&self, position: usize) -> Option<BroadcastMode> {
        self.inner.read().fragment_bmode.get(position).copied()
    }

    // --- commit and aggregation ----------------------------------------

    /// Enter POSTCOMMIT if and only if the commit guards hold:
    /// `data_check ∧ time_check`, no proof of misbehavior, and the FSM is
    /// still in PRECOMMIT. Returns the head to sign when the transition
    /// fires.
    pub fn try_enter_postcommit(&self) -> Option<H> {
        let mut s = self.inner.write();
        let ready = s.state == State::Precommit
            && s.data_check
            && s.time_check
            && s.cpom.is_none()
            && s.apom.is_none();
        if !ready {
            return None;
        }
        s.state = State::Postcommit;
        s.head.clone()
    }

    /// Offer a verified partial signature. Duplicates, full quorums,
    /// completed signatures, and stalled FSMs are ignored.
    pub fn add_partial_sig(&self, fragment: SignatureFragment, quorum: usize) -> SigAdmission {
        let mut s = self.inner.write();
        if s.state == State::Pom
            || s.signature.is_some()
            || s.partial_sigs.len() >= quorum
            || s.partial_sigs.contains(&fragment)
        {
            return SigAdmission::Ignored;
        }
        s.partial_sigs.push(fragment);
        SigAdmission::Added(s.partial_sigs.len())
    }

    /// The collected fragments.
    pub fn partial_sigs(&self) -> Vec<SignatureFragment> {
        self.inner.read().partial_sigs.clone()
    }

    /// Store the completed threshold signature, record the convergence
    /// time, and enter DONE. The signature lands at most once, and only
    /// when every commit guard holds: the artifact checked out, the commit
    /// timer fired, and no proof of misbehavior is on record.
    pub fn complete(&self, signature: ThresholdSignature) -> bool {
        let mut s = self.inner.write();
        let ready = s.signature.is_none()
            && s.data_check
            && s.time_check
            && s.cpom.is_none()
            && s.apom.is_none();
        if !ready {
            return false;
        }
        s.signature = Some(signature);
        s.converge_time = Some(self.start.elapsed());
        s.state = State::Done;
        true
    }

    // --- snapshots ------------------------------------------------------

    pub fn state(&self) -> State {
        self.inner.read().state
    }

    pub fn head(&self) -> Option<H> {
        self.inner.read().head.clone()
    }

    pub fn data_check(&self) -> bool {
        self.inner.read().data_check
    }

    pub fn time_check(&self) -> bool {
        self.inner.read().time_check
    }

    pub fn signature(&self) -> Option<ThresholdSignature> {
        self.inner.read().signature.clone()
    }

    pub fn conflict(&self) -> Option<ConflictProof> {
        self.inner.read().cpom.clone()
    }

    pub fn stalled(&self) -> bool {
        let s = self.inner.read();
        s.cpom.is_some() || s.apom.is_some()
    }

    pub fn full_file(&self) -> Vec<Vec<u8>> {
        self.inner.read().full_file.clone()
    }

    pub fn has_full_file(&self) -> bool {
        !self.inner.read().full_file.is_empty()
    }

    /// Seconds from FSM creation to threshold signature; zero when the
    /// quorum was never reached.
    pub fn converge_seconds(&self) -> f64 {
        self.inner
            .read()
            .converge_time
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// `(traffic_bytes, update_count)`.
    pub fn counters(&self) -> (u64, u64) {
        let s = self.inner.read();
        (s.traffic_bytes, s.update_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctng_core::{HeadKind, IssuerSignature, Srh};

    fn srh(head_byte: u8) -> Srh {
        Srh {
            caid: "C1".parse().unwrap(),
            period: 1,
            head: vec![head_byte; 96],
            timestamp: "2025-01-01T00:00:00Z".into(),
            signature: IssuerSignature {
                sig: "aa".into(),
                id: "C1".into(),
            },
        }
    }

    fn fsm() -> IssuerFsm<Srh, ctng_core::CaShardUpdate> {
        IssuerFsm::new("C1".parse().unwrap(), 1, 4, BroadcastMode::MinWt)
    }

    #[test]
    fn first_head_enters_precommit() {
        let fsm = fsm();
        assert!(matches!(fsm.admit_head(srh(1)), HeadAdmission::First));
        assert_eq!(fsm.state(), State::Precommit);
        assert!(matches!(fsm.admit_head(srh(1)), HeadAdmission::Duplicate));
    }

    #[test]
    fn conflicting_head_reports_existing() {
        let fsm = fsm();
        fsm.admit_head(srh(1));
        match fsm.admit_head(srh(2)) {
            HeadAdmission::Conflicting { existing } => assert_eq!(existing.head, vec![1; 96]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn conflict_is_first_writer_wins() {
        let fsm = fsm();
        fsm.admit_head(srh(1));
        let proof = ConflictProof {
            entity: "C1".parse().unwrap(),
            artifact1: HeadKind::Srh(srh(2)),
            artifact2: HeadKind::Srh(srh(1)),
        };
        assert!(fsm.record_conflict(proof.clone()));
        assert!(!fsm.record_conflict(proof));
        assert_eq!(fsm.state(), State::Pom);
        assert!(matches!(fsm.admit_head(srh(3)), HeadAdmission::Stalled));
    }

    #[test]
    fn fragment_count_is_monotone_and_dedup() {
        let fsm = fsm();
        assert_eq!(fsm.add_fragment(0, vec![1, 2]), Some(1));
        // Re-adding the same position does not grow the count.
        assert_eq!(fsm.add_fragment(0, vec![9, 9]), Some(1));
        assert_eq!(fsm.add_fragment(2, vec![3, 4]), Some(2));
        assert_eq!(fsm.add_fragment(9, vec![5]), None);
        assert!(fsm.fragment_present(0));
        assert!(!fsm.fragment_present(1));
    }

    #[test]
    fn reconstruction_gated_by_count_and_data_check() {
        let fsm = fsm();
        fsm.add_fragment(0, vec![1]);
        assert!(fsm.reconstruction_input(2).is_none());
        fsm.add_fragment(1, vec![2]);
        let input = fsm.reconstruction_input(2).unwrap();
        assert_eq!(input.iter().flatten().count(), 2);
        fsm.apply(Command::SetDataCheck);
        assert!(fsm.reconstruction_input(2).is_none());
    }

    #[test]
    fn postcommit_requires_all_guards() {
        let fsm = fsm();
        fsm.admit_head(srh(1));
        assert!(fsm.try_enter_postcommit().is_none());
        fsm.apply(Command::SetDataCheck);
        fsm.apply(Command::SetTimeCheck);
        assert!(fsm.try_enter_postcommit().is_some());
        // Second attempt no-ops: state already POSTCOMMIT.
        assert!(fsm.try_enter_postcommit().is_none());
    }

    #[test]
    fn partial_sig_dedup_and_quorum_cap() {
        let fsm = fsm();
        let frag = |id: &str| SignatureFragment {
            id: id.parse().unwrap(),
            sig: format!("s-{id}"),
        };
        assert_eq!(fsm.add_partial_sig(frag("M1"), 2), SigAdmission::Added(1));
        assert_eq!(fsm.add_partial_sig(frag("M1"), 2), SigAdmission::Ignored);
        assert_eq!(fsm.add_partial_sig(frag("M2"), 2), SigAdmission::Added(2));
        assert_eq!(fsm.add_partial_sig(frag("M3"), 2), SigAdmission::Ignored);
    }

    #[test]
    fn complete_requires_commit_guards_and_fires_once() {
        let fsm = fsm();
        let sig = ThresholdSignature {
            ids: vec!["M1".parse().unwrap()],
            sig: "aa".into(),
        };
        // Guards not satisfied yet: the signature must not land.
        assert!(!fsm.complete(sig.clone()));
        fsm.apply(Command::SetDataCheck);
        fsm.apply(Command::SetTimeCheck);
        assert!(fsm.complete(sig.clone()));
        assert!(!fsm.complete(sig));
        assert_eq!(fsm.state(), State::Done);
        assert!(fsm.converge_seconds() > 0.0);
    }

    #[test]
    fn stalled_fsm_never_completes() {
        let fsm = fsm();
        fsm.admit_head(srh(1));
        fsm.apply(Command::SetDataCheck);
        fsm.apply(Command::SetTimeCheck);
        let proof = ConflictProof {
            entity: "C1".parse().unwrap(),
            artifact1: HeadKind::Srh(srh(2)),
            artifact2: HeadKind::Srh(srh(1)),
        };
        fsm.record_conflict(proof);
        let sig = ThresholdSignature {
            ids: vec!["M1".parse().unwrap()],
            sig: "aa".into(),
        };
        assert!(!fsm.complete(sig));
        assert_eq!(fsm.state(), State::Pom);
    }

    #[test]
    fn min_bc_first_notification_flag() {
        let fsm = fsm();
        let note = Notification {
            kind: ctng_core::NotificationKind::RevocationEea,
            originator: "C1".parse().unwrap(),
            monitor: Some("M2".parse().unwrap()),
            sender: "127.0.0.1:9".into(),
        };
        assert!(fsm.push_fragment_notification(1, note.clone()));
        assert!(!fsm.push_fragment_notification(1, note.clone()));
        let mut other = note;
        other.sender = "127.0.0.1:10".into();
        assert!(!fsm.push_fragment_notification(1, other));
        assert_eq!(fsm.notifications_for(1).len(), 2);
    }
}
