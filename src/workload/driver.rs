//! Data-parallel training loop driving the layers of every rank.
//!
//! Per pass: forward through all layers (each forward waits for the previous
//! pass's weight-gradient collective of that layer), then backward from the
//! last layer (optional forward recomputation, weight-gradient compute whose
//! collective is left to overlap, input-gradient compute whose collective is
//! waited on before moving to the layer below). After the last pass every
//! outstanding weight-gradient collective is drained.

use std::fmt;
use std::io;

use tracing::{debug, info};

use super::spec::{BarrierMode, WorkloadError, WorkloadSpec};
use crate::cc::{CollectiveBarrier, RendezvousBarrier};
use crate::error::SimError;
use crate::layer::{Layer, LayerBinding, LayerNotice, NoticeKind, ParallelismPolicy, Phase};
use crate::report::{ReportAggregator, ReportSinks, RunTotals};
use crate::sim::{CallData, CallbackEvent, Callable, EntityId, EventType, Simulator, SysCtx, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    NotStarted,
    FwdDeps(usize),
    FwdCompute(usize),
    FwdComm(usize),
    BwdStart(usize),
    Recompute(usize),
    WgStart(usize),
    WgCompute(usize),
    IgStart(usize),
    IgCompute(usize),
    IgComm(usize),
    PassEnd,
    Drain(usize),
    Finished,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct RankRun {
    layers: Vec<Layer>,
    stage: Stage,
    pass: u32,
    finished_at: Option<Tick>,
}

pub struct Workload {
    ranks: Vec<RankRun>,
    passes: u32,
    parallelism: ParallelismPolicy,
    notices: Vec<(Tick, LayerNotice)>,
    started: bool,
}

impl Workload {
    /// Build one layer stack per rank; blocking barriers are shared per
    /// `(layer, phase)` across all ranks.
    pub fn new(spec: &WorkloadSpec) -> Result<Self, WorkloadError> {
        let ranks = spec.ranks;
        let defaults = &spec.defaults;
        let barriers: Vec<[CollectiveBarrier; 3]> = spec
            .layers
            .iter()
            .map(|_| {
                Phase::ALL.map(|_| match defaults.barrier {
                    BarrierMode::NonBlocking => CollectiveBarrier::NonBlocking,
                    BarrierMode::Blocking => {
                        CollectiveBarrier::Blocking(RendezvousBarrier::new(ranks))
                    }
                })
            })
            .collect();

        let stacks = (0..ranks)
            .map(|rank| {
                spec.layers
                    .iter()
                    .enumerate()
                    .map(|(index, layer_spec)| {
                        let binding = LayerBinding {
                            entity: EntityId::Layer { rank, index },
                            workload: EntityId::Workload,
                            roofline: spec.system.roofline,
                            participants: ranks,
                            auto_issue: defaults.auto_issue,
                            scheduling: defaults.scheduling,
                        };
                        let mut layer = Layer::new(layer_spec.clone(), index, binding);
                        for (phase, barrier) in Phase::ALL.into_iter().zip(&barriers[index]) {
                            layer.set_barrier(phase, barrier.clone());
                        }
                        layer
                    })
                    .collect()
            })
            .collect();

        Ok(Self::from_ranks(stacks, spec.passes, defaults.parallelism))
    }

    /// Wrap prebuilt layer stacks, one per rank.
    pub fn from_ranks(stacks: Vec<Vec<Layer>>, passes: u32, parallelism: ParallelismPolicy) -> Self {
        let ranks = stacks
            .into_iter()
            .map(|layers| RankRun {
                layers,
                stage: Stage::NotStarted,
                pass: 0,
                finished_at: None,
            })
            .collect();
        Self {
            ranks,
            passes: passes.max(1),
            parallelism,
            notices: Vec::new(),
            started: false,
        }
    }

    /// Schedule the start of training at the current tick.
    pub fn start(sim: &mut Simulator) {
        let now = sim.now();
        sim.schedule(
            now,
            CallbackEvent {
                target: EntityId::Workload,
                event: EventType::General,
                data: CallData::None,
            },
        );
    }

    pub fn ranks(&self) -> usize {
        self.ranks.len()
    }

    pub fn parallelism(&self) -> ParallelismPolicy {
        self.parallelism
    }

    pub fn layers(&self, rank: usize) -> &[Layer] {
        self.ranks.get(rank).map(|r| r.layers.as_slice()).unwrap_or(&[])
    }

    pub fn layer(&self, rank: usize, index: usize) -> Option<&Layer> {
        self.ranks.get(rank)?.layers.get(index)
    }

    pub fn layer_mut(&mut self, rank: usize, index: usize) -> Option<&mut Layer> {
        self.ranks.get_mut(rank)?.layers.get_mut(index)
    }

    /// Every notice received, with the tick it arrived at.
    pub fn notices(&self) -> &[(Tick, LayerNotice)] {
        &self.notices
    }

    pub fn finished_at(&self, rank: usize) -> Option<Tick> {
        self.ranks.get(rank)?.finished_at
    }

    pub fn is_finished(&self) -> bool {
        self.started && self.ranks.iter().all(|r| r.stage == Stage::Finished)
    }

    /// Latest finish tick over all ranks.
    pub fn makespan(&self) -> Option<Tick> {
        self.ranks.iter().map(|r| r.finished_at).collect::<Option<Vec<_>>>()?.into_iter().max()
    }

    /// Report every rank's layers; one `RunTotals` per rank.
    pub fn report(
        &self,
        run_name: &str,
        separate_log: bool,
        sinks: &mut ReportSinks,
    ) -> io::Result<Vec<RunTotals>> {
        let multi = self.ranks.len() > 1;
        self.ranks
            .iter()
            .enumerate()
            .map(|(rank, run)| {
                let name = if multi {
                    format!("{run_name}.rank{rank}")
                } else {
                    run_name.to_string()
                };
                ReportAggregator::new(name)
                    .separate_log(separate_log)
                    .report(&run.layers, sinks)
            })
            .collect()
    }

    fn begin(&mut self, cx: &mut SysCtx<'_>) -> Result<(), SimError> {
        self.started = true;
        info!(
            ranks = self.ranks.len(),
            passes = self.passes,
            parallelism = ?self.parallelism,
            "▶️  training started"
        );
        for rank in 0..self.ranks.len() {
            let run = &mut self.ranks[rank];
            if run.layers.is_empty() {
                run.stage = Stage::Finished;
                run.finished_at = Some(cx.now());
            } else {
                run.stage = Stage::FwdDeps(0);
            }
            self.step(rank, cx)?;
        }
        Ok(())
    }

    fn on_notice(&mut self, notice: LayerNotice, cx: &mut SysCtx<'_>) -> Result<(), SimError> {
        self.notices.push((cx.now(), notice));
        if !self.started {
            return Ok(());
        }
        let EntityId::Layer { rank, index } = notice.layer else {
            return Err(SimError::UnknownEntity(notice.layer));
        };
        let Some(run) = self.ranks.get_mut(rank) else {
            return Err(SimError::UnknownEntity(notice.layer));
        };

        let next = match (run.stage, notice.kind) {
            (Stage::FwdCompute(i), NoticeKind::ComputeDone(Phase::Forward)) if i == index => {
                Some(Stage::FwdComm(i))
            }
            (Stage::Recompute(i), NoticeKind::ComputeDone(Phase::Forward)) if i == index => {
                Some(Stage::WgStart(i))
            }
            (Stage::WgCompute(i), NoticeKind::ComputeDone(Phase::WeightGrad)) if i == index => {
                Some(Stage::IgStart(i))
            }
            (Stage::IgCompute(i), NoticeKind::ComputeDone(Phase::InputGrad)) if i == index => {
                Some(Stage::IgComm(i))
            }
            (Stage::FwdDeps(i), NoticeKind::CommUnblocked(Phase::WeightGrad))
            | (Stage::Drain(i), NoticeKind::CommUnblocked(Phase::WeightGrad))
            | (Stage::FwdComm(i), NoticeKind::CommUnblocked(Phase::Forward))
            | (Stage::IgComm(i), NoticeKind::CommUnblocked(Phase::InputGrad))
                if i == index =>
            {
                None
            }
            (stage, _) => {
                return Err(SimError::UnexpectedNotice {
                    rank,
                    notice,
                    stage: stage.to_string(),
                });
            }
        };
        if let Some(stage) = next {
            // Without auto-issue the collective after a compute step is ours to send.
            let recompute = matches!(run.stage, Stage::Recompute(_));
            if let NoticeKind::ComputeDone(phase) = notice.kind {
                let layer = &mut run.layers[index];
                if !recompute && !layer.auto_issue() {
                    debug!(rank, layer = %layer.id, %phase, "driver issuing collective");
                    layer.issue_bound_comm(phase, cx)?;
                }
            }
            run.stage = stage;
        }
        self.step(rank, cx)
    }

    /// Advance `rank` until it has to wait for a notice.
    fn step(&mut self, rank: usize, cx: &mut SysCtx<'_>) -> Result<(), SimError> {
        let passes = self.passes;
        let run = &mut self.ranks[rank];
        let n = run.layers.len();
        loop {
            let now = cx.now();
            let stage = run.stage;
            debug!(rank, %stage, pass = run.pass, "workload step");
            run.stage = match stage {
                Stage::NotStarted
                | Stage::Finished
                | Stage::FwdCompute(_)
                | Stage::Recompute(_)
                | Stage::WgCompute(_)
                | Stage::IgCompute(_) => return Ok(()),
                Stage::FwdDeps(i) => {
                    if !run.layers[i].is_weight_grad_comm_finished_blocking(now) {
                        return Ok(());
                    }
                    run.layers[i].start_compute(Phase::Forward, cx)?;
                    Stage::FwdCompute(i)
                }
                Stage::FwdComm(i) => {
                    if !run.layers[i].is_fwd_pass_comm_finished_blocking(now) {
                        return Ok(());
                    }
                    if i + 1 < n {
                        Stage::FwdDeps(i + 1)
                    } else {
                        Stage::BwdStart(n - 1)
                    }
                }
                Stage::BwdStart(i) => {
                    if run.layers[i].needs_fwd_in_bckwd_initiation() {
                        run.layers[i].recompute_fwd_pass(cx)?;
                        Stage::Recompute(i)
                    } else {
                        Stage::WgStart(i)
                    }
                }
                Stage::WgStart(i) => {
                    run.layers[i].start_compute(Phase::WeightGrad, cx)?;
                    Stage::WgCompute(i)
                }
                // The first layer's input gradient feeds nothing.
                Stage::IgStart(0) => Stage::PassEnd,
                Stage::IgStart(i) => {
                    run.layers[i].start_compute(Phase::InputGrad, cx)?;
                    Stage::IgCompute(i)
                }
                Stage::IgComm(i) => {
                    if !run.layers[i].is_input_grad_comm_finished_blocking(now) {
                        return Ok(());
                    }
                    Stage::BwdStart(i.saturating_sub(1))
                }
                Stage::PassEnd => {
                    run.pass += 1;
                    info!(rank, pass = run.pass, now = ?now, "pass finished");
                    if run.pass < passes {
                        Stage::FwdDeps(0)
                    } else {
                        Stage::Drain(0)
                    }
                }
                Stage::Drain(i) => {
                    if !run.layers[i].is_weight_grad_comm_finished_blocking(now) {
                        return Ok(());
                    }
                    if i + 1 < n {
                        Stage::Drain(i + 1)
                    } else {
                        run.finished_at = Some(now);
                        info!(rank, finished_at = ?now, "✅ rank finished");
                        Stage::Finished
                    }
                }
            };
        }
    }
}

impl Callable for Workload {
    fn call(&mut self, event: EventType, data: CallData, cx: &mut SysCtx<'_>) -> Result<(), SimError> {
        match (event, data) {
            (EventType::General, CallData::None) if !self.started => self.begin(cx),
            (EventType::General, CallData::Notice(notice)) => self.on_notice(notice, cx),
            (event, data) => Err(SimError::UnexpectedEvent { event, data }),
        }
    }
}
