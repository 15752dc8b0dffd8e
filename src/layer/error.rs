//! Protocol violations detected by a layer.

use thiserror::Error;

use super::phase::PhaseState;
use super::spec::Phase;
use crate::cc::{BarrierError, NetError, OpId};
use crate::sim::{CallData, EventType};

#[derive(Debug, Error, PartialEq)]
pub enum LayerError {
    #[error("layer {layer}: {phase} compute already scheduled")]
    ComputeAlreadyScheduled { layer: String, phase: Phase },
    #[error("layer {layer}: {phase} compute finished but none was scheduled")]
    ComputeNotScheduled { layer: String, phase: Phase },
    #[error("layer {layer}: cannot issue {phase} comm while {state:?}")]
    PhaseBusy {
        layer: String,
        phase: Phase,
        state: PhaseState,
    },
    #[error("layer {layer}: completion for unknown {phase} {op}")]
    UnknownOperation { layer: String, phase: Phase, op: OpId },
    #[error("layer {layer}: duplicate completion for {phase} {op}")]
    DuplicateCompletion { layer: String, phase: Phase, op: OpId },
    #[error("layer {layer}: {phase} barrier released but nothing was waiting")]
    UnexpectedRelease { layer: String, phase: Phase },
    #[error("layer {layer}: arrived twice at the {phase} barrier")]
    DuplicateArrival { layer: String, phase: Phase },
    #[error("layer {layer}: unexpected event {event:?} with {data:?}")]
    UnexpectedEvent {
        layer: String,
        event: EventType,
        data: CallData,
    },
    #[error(transparent)]
    Barrier(#[from] BarrierError),
    #[error(transparent)]
    Net(#[from] NetError),
}
