//! Crate-level error for scheduler dispatch.

use thiserror::Error;

use crate::layer::{LayerError, LayerNotice};
use crate::sim::{CallData, EntityId, EventType};

#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error("no entity registered as {0:?}")]
    UnknownEntity(EntityId),
    #[error("rank {rank}: unexpected {notice:?} while in {stage}")]
    UnexpectedNotice {
        rank: usize,
        notice: LayerNotice,
        stage: String,
    },
    #[error("workload cannot handle {event:?} with {data:?}")]
    UnexpectedEvent { event: EventType, data: CallData },
}
