//! Shared fixtures for the unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::rc::Rc;

use crate::cc::{
    CollectiveIssuer, CollectiveRequest, ComType, Completion, InvolvedDims, NetError, OpId,
    OutstandingOp,
};
use crate::layer::{Layer, LayerBinding, LayerSpec, ParallelismPolicy, PhaseSpec};
use crate::sim::{EntityId, Simulator, SysCtx, Tick};
use crate::workload::{TrainWorld, Workload};

/// One issuance seen by `ScriptedNetwork`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Issued {
    pub at: Tick,
    pub target: EntityId,
    pub op: OpId,
    pub finish: Tick,
}

/// Issuer whose collectives take scripted durations, in issue order.
pub struct ScriptedNetwork {
    dims: usize,
    durations: VecDeque<Tick>,
    fallback: Tick,
    log: Rc<RefCell<Vec<Issued>>>,
}

impl ScriptedNetwork {
    pub fn new(dims: usize, durations: impl IntoIterator<Item = u64>) -> Self {
        Self {
            dims,
            durations: durations.into_iter().map(Tick).collect(),
            fallback: Tick(10),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn log(&self) -> Rc<RefCell<Vec<Issued>>> {
        Rc::clone(&self.log)
    }
}

impl CollectiveIssuer for ScriptedNetwork {
    fn dims(&self) -> usize {
        self.dims
    }

    fn issue(
        &mut self,
        req: &CollectiveRequest<'_>,
        completion: Completion,
        sim: &mut Simulator,
    ) -> Result<OutstandingOp, NetError> {
        if req.dims.len() != self.dims {
            return Err(NetError::DimensionMismatch {
                expected: self.dims,
                got: req.dims.len(),
            });
        }
        let now = sim.now();
        let duration = self.durations.pop_front().unwrap_or(self.fallback);
        let finish = now.saturating_add(duration);
        self.log.borrow_mut().push(Issued {
            at: now,
            target: completion.target,
            op: completion.op,
            finish,
        });
        completion.schedule(finish, sim);
        Ok(OutstandingOp::new(completion.op, req.com_type, req.size_bytes, now))
    }
}

/// `io::Write` into a buffer the test keeps a handle to.
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Phase with `comm` over a single topology dimension.
pub fn comm_phase(compute: u64, comm: ComType, size: u64) -> PhaseSpec {
    PhaseSpec {
        oi: 0.0,
        compute_time: Tick(compute),
        compute_time_roofline: None,
        comm_type: comm,
        comm_size: size,
        involved_dims: InvolvedDims::new(vec![true]),
    }
}

pub fn layer_spec(id: &str) -> LayerSpec {
    LayerSpec {
        id: id.to_string(),
        fwd: comm_phase(100, ComType::AllGather, 1024),
        input_grad: comm_phase(50, ComType::None, 0),
        weight_grad: comm_phase(200, ComType::AllReduce, 4096),
        weight_grad_update_time: Tick::ZERO,
        needs_fwd_in_bckwd_initiation: false,
        is_checkpoint: false,
        parallelism: None,
    }
}

pub fn layer_at(spec: LayerSpec, rank: usize, index: usize, participants: usize) -> Layer {
    let mut binding = LayerBinding::new(EntityId::Layer { rank, index });
    binding.participants = participants;
    Layer::new(spec, index, binding)
}

/// World whose workload is never started: notices are only recorded.
pub fn idle_world(stacks: Vec<Vec<Layer>>, net: ScriptedNetwork) -> TrainWorld {
    TrainWorld::new(
        Box::new(net),
        Workload::from_ranks(stacks, 1, ParallelismPolicy::Data),
    )
}

/// Run `f` against one layer of `world` with a live system context.
pub fn with_layer<R>(
    world: &mut TrainWorld,
    sim: &mut Simulator,
    rank: usize,
    index: usize,
    f: impl FnOnce(&mut Layer, &mut SysCtx<'_>) -> R,
) -> R {
    let mut cx = SysCtx {
        sim,
        net: world.net.as_mut(),
    };
    let layer = world
        .workload
        .layer_mut(rank, index)
        .expect("layer exists");
    f(layer, &mut cx)
}
