use std::any::Any;

use super::driver::Workload;
use super::spec::{WorkloadError, WorkloadSpec};
use crate::cc::{AnalyticNetwork, CollectiveIssuer};
use crate::error::SimError;
use crate::sim::{CallData, Callable, EntityId, EventType, Simulator, SysCtx, World};

/// The simulation world: the network layer plus the workload owning all layers.
pub struct TrainWorld {
    pub net: Box<dyn CollectiveIssuer>,
    pub workload: Workload,
}

impl TrainWorld {
    pub fn new(net: Box<dyn CollectiveIssuer>, workload: Workload) -> Self {
        Self { net, workload }
    }

    /// Analytic network over the configured topology and a workload built from its layers.
    pub fn from_spec(spec: &WorkloadSpec) -> Result<Self, WorkloadError> {
        let net = AnalyticNetwork::new(spec.system.dims.clone())?;
        let workload = Workload::new(spec)?;
        Ok(Self::new(Box::new(net), workload))
    }

    /// Deliver one callback to its target entity.
    pub fn dispatch(
        &mut self,
        target: EntityId,
        event: EventType,
        data: CallData,
        sim: &mut Simulator,
    ) -> Result<(), SimError> {
        let mut cx = SysCtx {
            sim,
            net: self.net.as_mut(),
        };
        match target {
            EntityId::Layer { rank, index } => self
                .workload
                .layer_mut(rank, index)
                .ok_or(SimError::UnknownEntity(target))?
                .call(event, data, &mut cx),
            EntityId::Workload => self.workload.call(event, data, &mut cx),
        }
    }
}

impl World for TrainWorld {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
