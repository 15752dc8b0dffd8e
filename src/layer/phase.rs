//! Per-phase execution state machine.
//!
//! `Idle -> ComputeScheduled -> ComputeDone -> AwaitingBarrier -> CommIssued -> CommDone`
//!
//! Several collectives of the same phase may be in flight at once; each is
//! tracked by its own `OpId`. Waiting-start records are keyed by the same id
//! as the outstanding map; a stall episode is accounted once, from its first
//! blocking check until nothing it waits on is left.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, trace};

use super::error::LayerError;
use super::spec::{Phase, PhaseSpec, Roofline};
use crate::cc::{CollectiveBarrier, OpId, OutstandingOp, SchedulingPolicy};
use crate::sim::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Idle,
    ComputeScheduled,
    ComputeDone,
    AwaitingBarrier,
    CommIssued,
    CommDone,
}

#[derive(Debug, Clone, Copy)]
struct ScheduledCompute {
    duration: Tick,
    issue_after: bool,
}

/// Result of dispatching one completion into the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionOutcome {
    /// The completion ended a blocking wait on this phase.
    pub unblocked: bool,
}

#[derive(Debug)]
pub struct PhaseMachine {
    layer: String,
    phase: Phase,
    spec: PhaseSpec,
    state: PhaseState,
    barrier: CollectiveBarrier,
    outstanding: BTreeMap<OpId, OutstandingOp>,
    waiting_since: BTreeMap<OpId, Tick>,
    barrier_wait_since: Option<Tick>,
    stall_since: Option<Tick>,
    pending_issue: Option<SchedulingPolicy>,
    scheduled: Option<ScheduledCompute>,
    rendezvous: u64,

    total_compute: Tick,
    total_comm: Tick,
    total_exposed: Tick,
    last_finished: Tick,
    issued: u64,
    completed: u64,
}

impl PhaseMachine {
    pub fn new(layer: impl Into<String>, phase: Phase, spec: PhaseSpec) -> Self {
        Self {
            layer: layer.into(),
            phase,
            spec,
            state: PhaseState::Idle,
            barrier: CollectiveBarrier::NonBlocking,
            outstanding: BTreeMap::new(),
            waiting_since: BTreeMap::new(),
            barrier_wait_since: None,
            stall_since: None,
            pending_issue: None,
            scheduled: None,
            rendezvous: 0,
            total_compute: Tick::ZERO,
            total_comm: Tick::ZERO,
            total_exposed: Tick::ZERO,
            last_finished: Tick::ZERO,
            issued: 0,
            completed: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn spec(&self) -> &PhaseSpec {
        &self.spec
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn barrier(&self) -> &CollectiveBarrier {
        &self.barrier
    }

    pub fn set_barrier(&mut self, barrier: CollectiveBarrier) {
        self.barrier = barrier;
    }

    pub fn compute_time(&self, roofline: &Roofline) -> Tick {
        roofline.select(&self.spec)
    }

    pub fn total_compute(&self) -> Tick {
        self.total_compute
    }

    pub fn total_exposed(&self) -> Tick {
        self.total_exposed
    }

    pub fn last_finished(&self) -> Tick {
        self.last_finished
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Outstanding ops still tracked, finished-but-unpruned included.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_waiting(&self) -> bool {
        self.stall_since.is_some()
    }

    /// Accounted comm time plus finished ops not yet pruned. Read-only.
    pub fn observed_comm(&self) -> Tick {
        self.outstanding
            .values()
            .filter_map(OutstandingOp::duration)
            .fold(self.total_comm, Tick::saturating_add)
    }

    pub(crate) fn begin_compute(&mut self, duration: Tick, issue_after: bool) -> Result<(), LayerError> {
        if self.state == PhaseState::ComputeScheduled {
            return Err(LayerError::ComputeAlreadyScheduled {
                layer: self.layer.clone(),
                phase: self.phase,
            });
        }
        self.scheduled = Some(ScheduledCompute {
            duration,
            issue_after,
        });
        self.state = PhaseState::ComputeScheduled;
        Ok(())
    }

    /// Returns whether the compute step asked for its comm to follow.
    pub(crate) fn finish_compute(&mut self, now: Tick) -> Result<bool, LayerError> {
        let Some(done) = self.scheduled.take() else {
            return Err(LayerError::ComputeNotScheduled {
                layer: self.layer.clone(),
                phase: self.phase,
            });
        };
        self.total_compute = self.total_compute.saturating_add(done.duration);
        self.last_finished = now;
        self.state = PhaseState::ComputeDone;
        Ok(done.issue_after)
    }

    pub(crate) fn ensure_can_issue(&self) -> Result<(), LayerError> {
        match self.state {
            PhaseState::ComputeScheduled | PhaseState::AwaitingBarrier => Err(LayerError::PhaseBusy {
                layer: self.layer.clone(),
                phase: self.phase,
                state: self.state,
            }),
            _ => Ok(()),
        }
    }

    /// Phase has nothing to send; the step ends at compute.
    pub(crate) fn skip_comm(&mut self) {
        if self.outstanding.is_empty() {
            self.state = PhaseState::CommDone;
        }
    }

    /// Collective instance index for the next rendezvous.
    pub(crate) fn next_rendezvous(&mut self) -> u64 {
        let instance = self.rendezvous;
        self.rendezvous = self.rendezvous.saturating_add(1);
        instance
    }

    pub(crate) fn park(&mut self, scheduling: SchedulingPolicy) {
        self.pending_issue = Some(scheduling);
        self.state = PhaseState::AwaitingBarrier;
    }

    pub(crate) fn take_parked(&mut self) -> Result<SchedulingPolicy, LayerError> {
        match self.pending_issue.take() {
            Some(scheduling) if self.state == PhaseState::AwaitingBarrier => Ok(scheduling),
            _ => Err(LayerError::UnexpectedRelease {
                layer: self.layer.clone(),
                phase: self.phase,
            }),
        }
    }

    pub(crate) fn track(&mut self, op: OutstandingOp) {
        let id = op.id;
        trace!(layer = %self.layer, phase = %self.phase, op = %id, "tracking outstanding op");
        self.outstanding.insert(id, op);
        self.issued = self.issued.saturating_add(1);
        self.state = PhaseState::CommIssued;
        // A blocking wait that started at the barrier carries over to the op.
        if let Some(since) = self.barrier_wait_since.take() {
            self.waiting_since.insert(id, since);
        }
    }

    pub(crate) fn complete(&mut self, op: OpId, now: Tick) -> Result<CompletionOutcome, LayerError> {
        let Some(entry) = self.outstanding.get_mut(&op) else {
            return Err(LayerError::UnknownOperation {
                layer: self.layer.clone(),
                phase: self.phase,
                op,
            });
        };
        if !entry.mark_finished(now) {
            return Err(LayerError::DuplicateCompletion {
                layer: self.layer.clone(),
                phase: self.phase,
                op,
            });
        }
        self.completed = self.completed.saturating_add(1);
        self.last_finished = self.last_finished.max(now);

        // The episode ends only once every waited op is done and no parked
        // issue is still owed.
        let unblocked = self.waiting_since.remove(&op).is_some()
            && self.waiting_since.is_empty()
            && self.barrier_wait_since.is_none();
        if unblocked {
            if let Some(since) = self.stall_since.take() {
                let waited = now.saturating_sub(since);
                self.total_exposed = self.total_exposed.saturating_add(waited);
                debug!(layer = %self.layer, phase = %self.phase, op = %op, ?waited, "blocking wait over");
            }
            self.prune();
        }
        Ok(CompletionOutcome { unblocked })
    }

    /// Drop observed-complete ops, folding their durations into comm time.
    /// Returns `true` when nothing is left in flight.
    fn prune(&mut self) -> bool {
        let done: Vec<OpId> = self
            .outstanding
            .iter()
            .filter(|(_, op)| op.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in done {
            if let Some(d) = self.outstanding.remove(&id).and_then(|op| op.duration()) {
                self.total_comm = self.total_comm.saturating_add(d);
            }
        }
        let drained = self.outstanding.is_empty();
        if drained && self.state == PhaseState::CommIssued {
            self.state = PhaseState::CommDone;
        }
        drained
    }

    pub(crate) fn is_finished(&mut self) -> bool {
        let drained = self.prune();
        drained && self.pending_issue.is_none()
    }

    pub(crate) fn is_finished_blocking(&mut self, now: Tick) -> bool {
        if self.is_finished() {
            return true;
        }
        self.stall_since.get_or_insert(now);
        if self.pending_issue.is_some() {
            self.barrier_wait_since.get_or_insert(now);
        }
        for id in self.outstanding.keys() {
            self.waiting_since.entry(*id).or_insert(now);
        }
        debug!(
            layer = %self.layer,
            phase = %self.phase,
            pending = self.outstanding.len(),
            "blocked on outstanding comm"
        );
        false
    }

    pub(crate) fn increment_waiting(&mut self) {
        self.total_exposed = self.total_exposed.saturating_add(Tick(1));
    }
}
