use super::support::{ScriptedNetwork, idle_world, layer_at, layer_spec, with_layer};
use crate::cc::{CollectiveBarrier, OpId, SchedulingPolicy};
use crate::layer::{IssueOutcome, LayerError, LayerNotice, NoticeKind, Phase, PhaseState};
use crate::sim::{CallData, EntityId, EventType, Simulator, Tick};
use crate::workload::TrainWorld;

const L0: EntityId = EntityId::Layer { rank: 0, index: 0 };

fn single_layer_world(durations: impl IntoIterator<Item = u64>) -> TrainWorld {
    idle_world(
        vec![vec![layer_at(layer_spec("l0"), 0, 0, 1)]],
        ScriptedNetwork::new(1, durations),
    )
}

fn issue_fwd(world: &mut TrainWorld, sim: &mut Simulator) -> IssueOutcome {
    with_layer(world, sim, 0, 0, |layer, cx| {
        layer.issue_forward_pass_comm(SchedulingPolicy::Fifo, CollectiveBarrier::NonBlocking, cx)
    })
    .expect("issue fwd comm")
}

fn fwd_finished(world: &mut TrainWorld) -> bool {
    world
        .workload
        .layer_mut(0, 0)
        .expect("layer")
        .is_fwd_pass_comm_finished()
}

#[test]
fn out_of_order_completions_finish_only_after_the_last_one() {
    // ids 0,1,2 complete at ticks 70, 50, 65.
    let mut world = single_layer_world([70, 50, 65]);
    let mut sim = Simulator::default();
    for expected in 0..3 {
        assert_eq!(issue_fwd(&mut world, &mut sim), IssueOutcome::Issued(OpId(expected)));
    }
    assert_eq!(world.workload.layer(0, 0).expect("layer").collective_counter(), 3);

    sim.run_until(Tick(50), &mut world);
    assert!(!fwd_finished(&mut world));
    sim.run_until(Tick(65), &mut world);
    assert!(!fwd_finished(&mut world));
    sim.run_until(Tick(69), &mut world);
    assert!(!fwd_finished(&mut world));
    sim.run_until(Tick(70), &mut world);
    assert!(fwd_finished(&mut world));

    let layer = world.workload.layer(0, 0).expect("layer");
    let stats = layer.stats();
    assert_eq!(stats.fwd.comm, Tick(70 + 50 + 65));
    assert_eq!(stats.fwd.exposed, Tick::ZERO);
    assert_eq!(stats.fwd.issued, 3);
    assert_eq!(layer.phase(Phase::Forward).outstanding(), 0);
    assert_eq!(layer.phase_state(Phase::Forward), PhaseState::CommDone);
}

#[test]
fn non_blocking_checks_never_touch_exposed_time() {
    let mut world = single_layer_world([100]);
    let mut sim = Simulator::default();
    issue_fwd(&mut world, &mut sim);

    sim.run_until(Tick(40), &mut world);
    for _ in 0..5 {
        assert!(!fwd_finished(&mut world));
    }
    let stats = world.workload.layer(0, 0).expect("layer").stats();
    assert_eq!(stats.fwd.exposed, Tick::ZERO);
    assert_eq!(stats.fwd.comm, Tick::ZERO);

    sim.run(&mut world);
    assert!(fwd_finished(&mut world));
    let stats = world.workload.layer(0, 0).expect("layer").stats();
    assert_eq!(stats.fwd.exposed, Tick::ZERO);
    assert_eq!(stats.fwd.comm, Tick(100));
    assert!(world.workload.notices().is_empty());
}

#[test]
fn blocking_check_accounts_wait_until_last_pending_completion() {
    // Two ops; the first completes at 30, the second at 80.
    let mut world = single_layer_world([30, 80]);
    let mut sim = Simulator::default();
    issue_fwd(&mut world, &mut sim);
    issue_fwd(&mut world, &mut sim);

    sim.run_until(Tick(40), &mut world);
    let now = sim.now();
    let layer = world.workload.layer_mut(0, 0).expect("layer");
    assert!(!layer.is_fwd_pass_comm_finished_blocking(now));
    assert!(layer.phase(Phase::Forward).is_waiting());
    // Re-checking during the same stall keeps the original start.
    sim.run_until(Tick(60), &mut world);
    let now = sim.now();
    let layer = world.workload.layer_mut(0, 0).expect("layer");
    assert!(!layer.is_fwd_pass_comm_finished_blocking(now));

    sim.run(&mut world);
    let layer = world.workload.layer_mut(0, 0).expect("layer");
    assert_eq!(layer.stats().fwd.exposed, Tick(80 - 40));
    assert!(!layer.phase(Phase::Forward).is_waiting());
    assert_eq!(
        world.workload.notices(),
        &[(
            Tick(80),
            LayerNotice {
                layer: L0,
                kind: NoticeKind::CommUnblocked(Phase::Forward),
            }
        )]
    );

    // Resumption: already finished, no further accounting.
    let layer = world.workload.layer_mut(0, 0).expect("layer");
    assert!(layer.is_fwd_pass_comm_finished_blocking(Tick(500)));
    assert_eq!(layer.stats().fwd.exposed, Tick(40));
    assert_eq!(layer.stats().fwd.comm, Tick(30 + 80));
}

#[test]
fn stall_episode_counts_from_the_first_blocking_check() {
    // op0 runs 0..30; op1 is issued mid-stall and runs 15..40.
    let mut world = single_layer_world([30, 25]);
    let mut sim = Simulator::default();
    issue_fwd(&mut world, &mut sim);

    sim.run_until(Tick(10), &mut world);
    let layer = world.workload.layer_mut(0, 0).expect("layer");
    assert!(!layer.is_fwd_pass_comm_finished_blocking(Tick(10)));

    sim.run_until(Tick(15), &mut world);
    assert_eq!(issue_fwd(&mut world, &mut sim), IssueOutcome::Issued(OpId(1)));
    sim.run_until(Tick(20), &mut world);
    let layer = world.workload.layer_mut(0, 0).expect("layer");
    assert!(!layer.is_fwd_pass_comm_finished_blocking(Tick(20)));

    // op0 alone does not end the stall.
    sim.run_until(Tick(30), &mut world);
    assert!(world.workload.notices().is_empty());

    sim.run(&mut world);
    let layer = world.workload.layer_mut(0, 0).expect("layer");
    assert!(layer.is_fwd_pass_comm_finished_blocking(Tick(40)));
    assert_eq!(layer.stats().fwd.exposed, Tick(40 - 10));
    assert_eq!(layer.stats().fwd.comm, Tick(30 + 25));
    assert_eq!(
        world.workload.notices(),
        &[(
            Tick(40),
            LayerNotice {
                layer: L0,
                kind: NoticeKind::CommUnblocked(Phase::Forward),
            }
        )]
    );
}

#[test]
fn separate_stall_episodes_are_counted_separately() {
    let mut world = single_layer_world([20, 20]);
    let mut sim = Simulator::default();
    issue_fwd(&mut world, &mut sim);
    sim.run_until(Tick(5), &mut world);
    let layer = world.workload.layer_mut(0, 0).expect("layer");
    assert!(!layer.is_fwd_pass_comm_finished_blocking(Tick(5)));
    sim.run(&mut world);

    // Second episode: issued at 20, waited on from 30 to 40.
    issue_fwd(&mut world, &mut sim);
    sim.run_until(Tick(30), &mut world);
    let layer = world.workload.layer_mut(0, 0).expect("layer");
    assert!(!layer.is_fwd_pass_comm_finished_blocking(Tick(30)));
    sim.run(&mut world);

    let stats = world.workload.layer(0, 0).expect("layer").stats();
    assert_eq!(stats.fwd.exposed, Tick(15 + 10));
    assert_eq!(world.workload.notices().len(), 2);
}

#[test]
fn blocking_check_with_nothing_pending_returns_true_immediately() {
    let mut world = single_layer_world([]);
    let layer = world.workload.layer_mut(0, 0).expect("layer");
    assert!(layer.is_input_grad_comm_finished_blocking(Tick(5)));
    assert!(layer.is_weight_grad_comm_finished_blocking(Tick(5)));
    assert_eq!(layer.stats().total_exposed, Tick::ZERO);
}

#[test]
fn increment_hooks_add_to_exposed_time() {
    let mut world = single_layer_world([]);
    let layer = world.workload.layer_mut(0, 0).expect("layer");
    layer.increment_waiting_for_fwd();
    layer.increment_waiting_for_ig();
    layer.increment_waiting_for_wg();
    layer.increment_waiting_for_wg();
    let stats = layer.stats();
    assert_eq!(stats.fwd.exposed, Tick(1));
    assert_eq!(stats.input_grad.exposed, Tick(1));
    assert_eq!(stats.weight_grad.exposed, Tick(2));
    assert_eq!(stats.total_exposed, Tick(4));
}

#[test]
fn compute_completion_issues_comm_automatically() {
    let mut world = single_layer_world([25]);
    let mut sim = Simulator::default();
    let compute = with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.start_compute(Phase::WeightGrad, cx)
    })
    .expect("start compute");
    assert_eq!(compute, Tick(200));
    assert_eq!(
        world.workload.layer(0, 0).expect("layer").phase_state(Phase::WeightGrad),
        PhaseState::ComputeScheduled
    );

    sim.run_until(Tick(200), &mut world);
    let layer = world.workload.layer(0, 0).expect("layer");
    assert_eq!(layer.phase_state(Phase::WeightGrad), PhaseState::CommIssued);
    assert_eq!(layer.stats().weight_grad.compute, Tick(200));
    assert_eq!(
        world.workload.notices(),
        &[(
            Tick(200),
            LayerNotice {
                layer: L0,
                kind: NoticeKind::ComputeDone(Phase::WeightGrad),
            }
        )]
    );

    sim.run(&mut world);
    let layer = world.workload.layer_mut(0, 0).expect("layer");
    assert!(layer.is_weight_grad_comm_finished());
    assert_eq!(layer.stats().weight_grad.comm, Tick(25));
    assert_eq!(layer.stats().weight_grad.last_finished, Tick(225));
}

#[test]
fn phase_without_comm_skips_issuance() {
    let mut world = single_layer_world([]);
    let mut sim = Simulator::default();
    let out = with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.issue_input_grad_comm(SchedulingPolicy::Fifo, CollectiveBarrier::NonBlocking, cx)
    })
    .expect("issue ig comm");
    assert_eq!(out, IssueOutcome::NoComm);
    assert_eq!(sim.pending(), 0);
    let layer = world.workload.layer_mut(0, 0).expect("layer");
    assert_eq!(layer.collective_counter(), 0);
    assert!(layer.is_input_grad_comm_finished());
}

#[test]
fn recompute_does_not_issue_comm() {
    let mut world = single_layer_world([]);
    let mut sim = Simulator::default();
    with_layer(&mut world, &mut sim, 0, 0, |layer, cx| layer.recompute_fwd_pass(cx))
        .expect("recompute");
    sim.run(&mut world);
    let layer = world.workload.layer(0, 0).expect("layer");
    assert_eq!(layer.collective_counter(), 0);
    assert_eq!(layer.stats().fwd.compute, Tick(100));
    assert_eq!(layer.phase_state(Phase::Forward), PhaseState::ComputeDone);
}

#[test]
fn weight_update_delays_the_next_forward_compute() {
    let mut spec = layer_spec("l0");
    spec.weight_grad.comm_type = crate::cc::ComType::None;
    spec.weight_grad_update_time = Tick(15);
    let mut world = idle_world(vec![vec![layer_at(spec, 0, 0, 1)]], ScriptedNetwork::new(1, []));
    let mut sim = Simulator::default();

    with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.start_compute(Phase::WeightGrad, cx)
    })
    .expect("wg compute");
    sim.run(&mut world);
    assert_eq!(sim.now(), Tick(200));

    with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.recompute_fwd_pass(cx)
    })
    .expect("fwd compute");
    sim.run(&mut world);
    assert_eq!(sim.now(), Tick(200 + 15 + 100));

    let layer = world.workload.layer(0, 0).expect("layer");
    assert_eq!(layer.total_update(), Tick(15));
    assert_eq!(layer.stats().fwd.compute, Tick(100));
    assert_eq!(layer.stats().weight_update, Tick(15));
}

#[test]
fn duplicate_completion_is_rejected() {
    let mut world = single_layer_world([10]);
    let mut sim = Simulator::default();
    issue_fwd(&mut world, &mut sim);
    let done = CallData::Comm {
        phase: Phase::Forward,
        op: OpId(0),
    };

    with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.handle(EventType::CommFinished, done, cx)
    })
    .expect("first completion");
    let err = with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.handle(EventType::CommFinished, done, cx)
    })
    .unwrap_err();
    assert_eq!(
        err,
        LayerError::DuplicateCompletion {
            layer: "l0".into(),
            phase: Phase::Forward,
            op: OpId(0),
        }
    );

    // Once accounted and pruned the id is no longer known at all.
    assert!(fwd_finished(&mut world));
    let err = with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.handle(EventType::CommFinished, done, cx)
    })
    .unwrap_err();
    assert!(matches!(err, LayerError::UnknownOperation { .. }));
}

#[test]
fn completion_for_the_wrong_phase_is_rejected() {
    let mut world = single_layer_world([10]);
    let mut sim = Simulator::default();
    issue_fwd(&mut world, &mut sim);
    let err = with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.handle(
            EventType::CommFinished,
            CallData::Comm {
                phase: Phase::WeightGrad,
                op: OpId(0),
            },
            cx,
        )
    })
    .unwrap_err();
    assert!(matches!(
        err,
        LayerError::UnknownOperation {
            phase: Phase::WeightGrad,
            ..
        }
    ));
}

#[test]
fn malformed_and_unscheduled_events_are_rejected() {
    let mut world = single_layer_world([]);
    let mut sim = Simulator::default();
    let err = with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.handle(EventType::ComputeFinished, CallData::None, cx)
    })
    .unwrap_err();
    assert!(matches!(err, LayerError::UnexpectedEvent { .. }));

    let err = with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.handle(EventType::ComputeFinished, CallData::Phase(Phase::InputGrad), cx)
    })
    .unwrap_err();
    assert!(matches!(err, LayerError::ComputeNotScheduled { .. }));

    let err = with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.handle(EventType::BarrierReleased, CallData::Phase(Phase::Forward), cx)
    })
    .unwrap_err();
    assert!(matches!(err, LayerError::UnexpectedRelease { .. }));
}

#[test]
fn compute_cannot_be_scheduled_twice_or_overlap_its_own_issue() {
    let mut world = single_layer_world([]);
    let mut sim = Simulator::default();
    with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.start_compute(Phase::Forward, cx)
    })
    .expect("first compute");
    let err = with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.start_compute(Phase::Forward, cx)
    })
    .unwrap_err();
    assert!(matches!(err, LayerError::ComputeAlreadyScheduled { .. }));

    let err = with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.issue_forward_pass_comm(SchedulingPolicy::Fifo, CollectiveBarrier::NonBlocking, cx)
    })
    .unwrap_err();
    assert!(matches!(
        err,
        LayerError::PhaseBusy {
            state: PhaseState::ComputeScheduled,
            ..
        }
    ));
}

#[test]
fn dimension_mismatch_from_the_network_surfaces_as_layer_error() {
    let mut world = idle_world(
        vec![vec![layer_at(layer_spec("l0"), 0, 0, 1)]],
        ScriptedNetwork::new(2, []),
    );
    let mut sim = Simulator::default();
    let err = with_layer(&mut world, &mut sim, 0, 0, |layer, cx| {
        layer.issue_forward_pass_comm(SchedulingPolicy::Fifo, CollectiveBarrier::NonBlocking, cx)
    })
    .unwrap_err();
    assert!(matches!(err, LayerError::Net(_)));
}
