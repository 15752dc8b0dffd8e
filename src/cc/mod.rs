//! Collective communication: types, issuance seam, analytic network and the
//! rendezvous barrier.

pub mod barrier;
pub mod collective;
pub mod network;
pub mod outstanding;

pub use barrier::{Arrival, BarrierError, BarrierWaiter, CollectiveBarrier, RendezvousBarrier};
pub use collective::{ComType, InvolvedDims, SchedulingPolicy};
pub use network::{
    AnalyticNetwork, CollectiveIssuer, CollectiveRequest, Completion, DimLink, NetError,
};
pub use outstanding::{OpId, OutstandingOp};
