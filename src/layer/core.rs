//! A single layer of the model graph: owns the three phase machines, turns
//! scheduler callbacks into phase transitions and reports its statistics.

use std::io;

use tracing::{debug, info, instrument, trace};

use super::error::LayerError;
use super::phase::{PhaseMachine, PhaseState};
use super::spec::{LayerSpec, ParallelismPolicy, Phase, Roofline};
use crate::cc::{
    Arrival, BarrierWaiter, CollectiveBarrier, CollectiveRequest, Completion, InvolvedDims, OpId,
    SchedulingPolicy,
};
use crate::error::SimError;
use crate::report::{LayerStats, PhaseStats, ReportArgs, ReportSinks};
use crate::sim::{CallData, CallbackEvent, Callable, EntityId, EventType, SysCtx, Tick};

/// What a layer tells the workload driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerNotice {
    pub layer: EntityId,
    pub kind: NoticeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// The phase's compute timer fired (and its comm, if automatic, was issued).
    ComputeDone(Phase),
    /// A blocking completion check on the phase can now succeed.
    CommUnblocked(Phase),
}

/// Outcome of a comm issuance request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueOutcome {
    Issued(OpId),
    /// Parked at the rendezvous barrier; issued when it releases.
    AwaitingBarrier,
    /// The phase declares no collective.
    NoComm,
}

/// Where a layer sits in the simulation and how it issues its collectives.
#[derive(Debug, Clone)]
pub struct LayerBinding {
    pub entity: EntityId,
    /// Non-owning back-reference to the driver receiving notices.
    pub workload: EntityId,
    pub roofline: Roofline,
    /// Participants this layer expects at each of its barriers.
    pub participants: usize,
    /// Issue a phase's collective as soon as its compute finishes.
    pub auto_issue: bool,
    pub scheduling: SchedulingPolicy,
}

impl LayerBinding {
    pub fn new(entity: EntityId) -> Self {
        Self {
            entity,
            workload: EntityId::Workload,
            roofline: Roofline::default(),
            participants: 1,
            auto_issue: true,
            scheduling: SchedulingPolicy::Fifo,
        }
    }
}

#[derive(Debug)]
pub struct Layer {
    pub id: String,
    pub layer_num: usize,
    binding: LayerBinding,

    fwd: PhaseMachine,
    ig: PhaseMachine,
    wg: PhaseMachine,

    weight_grad_update_time: Tick,
    update_pending: bool,
    total_update: Tick,

    needs_fwd_in_bckwd_initiation: bool,
    is_checkpoint: bool,
    specific_parallelism: Option<ParallelismPolicy>,

    collective_counter: u64,
}

impl Layer {
    pub fn new(spec: LayerSpec, layer_num: usize, binding: LayerBinding) -> Self {
        let LayerSpec {
            id,
            fwd,
            input_grad,
            weight_grad,
            weight_grad_update_time,
            needs_fwd_in_bckwd_initiation,
            is_checkpoint,
            parallelism,
        } = spec;
        Self {
            fwd: PhaseMachine::new(id.clone(), Phase::Forward, fwd),
            ig: PhaseMachine::new(id.clone(), Phase::InputGrad, input_grad),
            wg: PhaseMachine::new(id.clone(), Phase::WeightGrad, weight_grad),
            id,
            layer_num,
            binding,
            weight_grad_update_time,
            update_pending: false,
            total_update: Tick::ZERO,
            needs_fwd_in_bckwd_initiation,
            is_checkpoint,
            specific_parallelism: parallelism,
            collective_counter: 0,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.binding.entity
    }

    pub fn phase(&self, phase: Phase) -> &PhaseMachine {
        match phase {
            Phase::Forward => &self.fwd,
            Phase::InputGrad => &self.ig,
            Phase::WeightGrad => &self.wg,
        }
    }

    fn phase_mut(&mut self, phase: Phase) -> &mut PhaseMachine {
        match phase {
            Phase::Forward => &mut self.fwd,
            Phase::InputGrad => &mut self.ig,
            Phase::WeightGrad => &mut self.wg,
        }
    }

    pub fn set_barrier(&mut self, phase: Phase, barrier: CollectiveBarrier) {
        self.phase_mut(phase).set_barrier(barrier);
    }

    pub fn needs_fwd_in_bckwd_initiation(&self) -> bool {
        self.needs_fwd_in_bckwd_initiation
    }

    pub fn is_checkpoint(&self) -> bool {
        self.is_checkpoint
    }

    pub fn specific_parallelism(&self) -> Option<ParallelismPolicy> {
        self.specific_parallelism
    }

    pub fn effective_parallelism(&self, global: ParallelismPolicy) -> ParallelismPolicy {
        self.specific_parallelism.unwrap_or(global)
    }

    /// Whether a phase's collective follows its compute without the driver asking.
    pub fn auto_issue(&self) -> bool {
        self.binding.auto_issue
    }

    /// Collectives issued by this layer so far.
    pub fn collective_counter(&self) -> u64 {
        self.collective_counter
    }

    pub fn total_update(&self) -> Tick {
        self.total_update
    }

    // ---- compute-time selection -------------------------------------------

    pub fn get_fwd_pass_compute(&self) -> Tick {
        self.fwd.compute_time(&self.binding.roofline)
    }

    pub fn get_input_grad_compute(&self) -> Tick {
        self.ig.compute_time(&self.binding.roofline)
    }

    pub fn get_weight_grad_compute(&self) -> Tick {
        self.wg.compute_time(&self.binding.roofline)
    }

    pub fn get_compute(&self, phase: Phase) -> Tick {
        self.phase(phase).compute_time(&self.binding.roofline)
    }

    // ---- compute scheduling -----------------------------------------------

    /// Schedule the compute timer for `phase`. Its collective follows
    /// automatically if the layer is bound with `auto_issue`.
    pub fn start_compute(&mut self, phase: Phase, cx: &mut SysCtx<'_>) -> Result<Tick, LayerError> {
        self.schedule_compute(phase, true, cx)
    }

    /// Forward compute for recomputation during backward; no comm follows.
    pub fn recompute_fwd_pass(&mut self, cx: &mut SysCtx<'_>) -> Result<Tick, LayerError> {
        self.schedule_compute(Phase::Forward, false, cx)
    }

    fn schedule_compute(
        &mut self,
        phase: Phase,
        issue_after: bool,
        cx: &mut SysCtx<'_>,
    ) -> Result<Tick, LayerError> {
        let compute = self.get_compute(phase);
        self.phase_mut(phase).begin_compute(compute, issue_after)?;

        // Pending optimizer update runs before the weights are read again.
        let mut delay = compute;
        if phase == Phase::Forward && self.update_pending {
            self.update_pending = false;
            self.total_update = self.total_update.saturating_add(self.weight_grad_update_time);
            delay = delay.saturating_add(self.weight_grad_update_time);
        }

        trace!(layer = %self.id, %phase, ?compute, ?delay, "compute scheduled");
        cx.sim.schedule_in(
            delay,
            CallbackEvent {
                target: self.binding.entity,
                event: EventType::ComputeFinished,
                data: CallData::Phase(phase),
            },
        );
        Ok(compute)
    }

    // ---- comm issuance ----------------------------------------------------

    pub fn issue_forward_pass_comm(
        &mut self,
        pref_scheduling: SchedulingPolicy,
        barrier: CollectiveBarrier,
        cx: &mut SysCtx<'_>,
    ) -> Result<IssueOutcome, LayerError> {
        self.issue_comm(Phase::Forward, pref_scheduling, barrier, cx)
    }

    pub fn issue_input_grad_comm(
        &mut self,
        pref_scheduling: SchedulingPolicy,
        barrier: CollectiveBarrier,
        cx: &mut SysCtx<'_>,
    ) -> Result<IssueOutcome, LayerError> {
        self.issue_comm(Phase::InputGrad, pref_scheduling, barrier, cx)
    }

    pub fn issue_weight_grad_comm(
        &mut self,
        pref_scheduling: SchedulingPolicy,
        barrier: CollectiveBarrier,
        cx: &mut SysCtx<'_>,
    ) -> Result<IssueOutcome, LayerError> {
        self.issue_comm(Phase::WeightGrad, pref_scheduling, barrier, cx)
    }

    #[instrument(level = "debug", skip(self, barrier, cx), fields(layer = %self.id))]
    pub fn issue_comm(
        &mut self,
        phase: Phase,
        pref_scheduling: SchedulingPolicy,
        barrier: CollectiveBarrier,
        cx: &mut SysCtx<'_>,
    ) -> Result<IssueOutcome, LayerError> {
        let entity = self.binding.entity;
        let participants = self.binding.participants;
        let layer = self.id.clone();
        let m = self.phase_mut(phase);
        m.ensure_can_issue()?;
        if m.spec().comm_type.is_none() {
            m.skip_comm();
            return Ok(IssueOutcome::NoComm);
        }

        let CollectiveBarrier::Blocking(barrier) = barrier else {
            return self.issue_now(phase, pref_scheduling, cx).map(IssueOutcome::Issued);
        };

        let instance = m.next_rendezvous();
        let me = BarrierWaiter {
            target: entity,
            phase,
        };
        match barrier.arrive(me, participants, instance)? {
            Arrival::Waiting { arrived, expected } => {
                debug!(%phase, instance, arrived, expected, "waiting at barrier");
                m.park(pref_scheduling);
                Ok(IssueOutcome::AwaitingBarrier)
            }
            Arrival::Duplicate => Err(LayerError::DuplicateArrival { layer, phase }),
            Arrival::Released { waiters } => {
                let now = cx.now();
                for w in waiters.into_iter().filter(|w| *w != me) {
                    cx.sim.schedule(
                        now,
                        CallbackEvent {
                            target: w.target,
                            event: EventType::BarrierReleased,
                            data: CallData::Phase(w.phase),
                        },
                    );
                }
                self.issue_now(phase, pref_scheduling, cx)
                    .map(IssueOutcome::Issued)
            }
        }
    }

    /// Issue `phase`'s collective with the bound scheduling hint and the
    /// phase's own barrier.
    pub fn issue_bound_comm(
        &mut self,
        phase: Phase,
        cx: &mut SysCtx<'_>,
    ) -> Result<IssueOutcome, LayerError> {
        let barrier = self.phase(phase).barrier().clone();
        self.issue_comm(phase, self.binding.scheduling, barrier, cx)
    }

    fn issue_now(
        &mut self,
        phase: Phase,
        scheduling: SchedulingPolicy,
        cx: &mut SysCtx<'_>,
    ) -> Result<OpId, LayerError> {
        let op = OpId(self.collective_counter);
        self.collective_counter = self.collective_counter.saturating_add(1);
        let entity = self.binding.entity;
        let m = self.phase_mut(phase);

        let spec = m.spec();
        let req = CollectiveRequest {
            com_type: spec.comm_type,
            size_bytes: spec.comm_size,
            dims: &spec.involved_dims,
            scheduling,
        };
        let handle = cx.net.issue(
            &req,
            Completion {
                target: entity,
                phase,
                op,
            },
            cx.sim,
        )?;
        m.track(handle);
        debug!(%phase, %op, "collective issued");
        Ok(op)
    }

    // ---- completion checks ------------------------------------------------

    pub fn is_fwd_pass_comm_finished(&mut self) -> bool {
        self.fwd.is_finished()
    }

    pub fn is_input_grad_comm_finished(&mut self) -> bool {
        self.ig.is_finished()
    }

    pub fn is_weight_grad_comm_finished(&mut self) -> bool {
        self.wg.is_finished()
    }

    /// Non-blocking: prunes completed ops, never touches exposed time.
    pub fn is_comm_finished(&mut self, phase: Phase) -> bool {
        self.phase_mut(phase).is_finished()
    }

    pub fn is_fwd_pass_comm_finished_blocking(&mut self, now: Tick) -> bool {
        self.fwd.is_finished_blocking(now)
    }

    pub fn is_input_grad_comm_finished_blocking(&mut self, now: Tick) -> bool {
        self.ig.is_finished_blocking(now)
    }

    pub fn is_weight_grad_comm_finished_blocking(&mut self, now: Tick) -> bool {
        self.wg.is_finished_blocking(now)
    }

    /// Blocking: `true` if nothing is pending. Otherwise records the wait
    /// start and returns `false`; the layer sends `CommUnblocked` once the
    /// pending ops complete, with the wait added to exposed time.
    pub fn is_comm_finished_blocking(&mut self, phase: Phase, now: Tick) -> bool {
        self.phase_mut(phase).is_finished_blocking(now)
    }

    pub fn increment_waiting_for_wg(&mut self) {
        self.wg.increment_waiting();
    }

    pub fn increment_waiting_for_ig(&mut self) {
        self.ig.increment_waiting();
    }

    pub fn increment_waiting_for_fwd(&mut self) {
        self.fwd.increment_waiting();
    }

    // ---- dispatch ---------------------------------------------------------

    fn notify(&self, kind: NoticeKind, cx: &mut SysCtx<'_>) {
        let now = cx.now();
        cx.sim.schedule(
            now,
            CallbackEvent {
                target: self.binding.workload,
                event: EventType::General,
                data: CallData::Notice(LayerNotice {
                    layer: self.binding.entity,
                    kind,
                }),
            },
        );
    }

    fn on_compute_finished(&mut self, phase: Phase, cx: &mut SysCtx<'_>) -> Result<(), LayerError> {
        let now = cx.now();
        let issue_after = self.phase_mut(phase).finish_compute(now)?;
        if phase == Phase::WeightGrad && self.weight_grad_update_time > Tick::ZERO {
            self.update_pending = true;
        }
        if issue_after && self.binding.auto_issue {
            self.issue_bound_comm(phase, cx)?;
        }
        self.notify(NoticeKind::ComputeDone(phase), cx);
        Ok(())
    }

    fn on_comm_finished(&mut self, phase: Phase, op: OpId, cx: &mut SysCtx<'_>) -> Result<(), LayerError> {
        let now = cx.now();
        let outcome = self.phase_mut(phase).complete(op, now)?;
        trace!(layer = %self.id, %phase, %op, unblocked = outcome.unblocked, "comm finished");
        if outcome.unblocked {
            self.notify(NoticeKind::CommUnblocked(phase), cx);
        }
        Ok(())
    }

    fn on_barrier_released(&mut self, phase: Phase, cx: &mut SysCtx<'_>) -> Result<(), LayerError> {
        let scheduling = self.phase_mut(phase).take_parked()?;
        self.issue_now(phase, scheduling, cx)?;
        Ok(())
    }

    /// Route one scheduler callback to the right phase.
    pub fn handle(
        &mut self,
        event: EventType,
        data: CallData,
        cx: &mut SysCtx<'_>,
    ) -> Result<(), LayerError> {
        match (event, data) {
            (EventType::ComputeFinished, CallData::Phase(phase)) => self.on_compute_finished(phase, cx),
            (EventType::CommFinished, CallData::Comm { phase, op }) => self.on_comm_finished(phase, op, cx),
            (EventType::BarrierReleased, CallData::Phase(phase)) => self.on_barrier_released(phase, cx),
            (event, data) => Err(LayerError::UnexpectedEvent {
                layer: self.id.clone(),
                event,
                data,
            }),
        }
    }

    // ---- reporting --------------------------------------------------------

    /// Read-only snapshot of the layer's counters.
    pub fn stats(&self) -> LayerStats {
        let roofline = &self.binding.roofline;
        let phase_stats = |m: &PhaseMachine| PhaseStats {
            compute: m.total_compute(),
            comm: m.observed_comm(),
            exposed: m.total_exposed(),
            oi: m.spec().oi,
            compute_bound: roofline.is_compute_bound(m.spec().oi),
            issued: m.issued(),
            last_finished: m.last_finished(),
        };
        LayerStats::new(
            self.id.clone(),
            self.layer_num,
            phase_stats(&self.fwd),
            phase_stats(&self.ig),
            phase_stats(&self.wg),
            self.total_update,
        )
    }

    /// Assemble this layer's record, write it to the sinks, and add its
    /// compute and exposed totals to the caller's running totals.
    pub fn report(
        &self,
        args: &ReportArgs<'_>,
        sinks: &mut ReportSinks,
        total_compute: &mut f64,
        total_exposed: &mut f64,
    ) -> io::Result<LayerStats> {
        let stats = self.stats();
        sinks.write_layer(args, &stats)?;
        *total_compute += stats.total_compute.0 as f64;
        *total_exposed += stats.total_exposed.0 as f64;
        Ok(stats)
    }

    /// Diagnostic dump of a participating-dimension mask.
    pub fn print_involved_dimensions(&self, dims: &InvolvedDims) -> String {
        let rendered = dims.to_string();
        info!(layer = %self.id, involved_dimensions = %rendered, "involved dimensions");
        rendered
    }

    pub fn phase_state(&self, phase: Phase) -> PhaseState {
        self.phase(phase).state()
    }
}

impl Callable for Layer {
    fn call(&mut self, event: EventType, data: CallData, cx: &mut SysCtx<'_>) -> Result<(), SimError> {
        Ok(self.handle(event, data, cx)?)
    }
}
