//! Rendezvous barrier gating collective issuance across participants.
//!
//! The simulation is single-threaded, so the shared state lives behind
//! `Rc<RefCell<..>>` rather than a lock. "Blocking" at the barrier means the
//! arriving participant returns control; it is woken by a `BarrierReleased`
//! callback once the last expected participant arrives.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::layer::Phase;
use crate::sim::EntityId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BarrierError {
    #[error("participant {participant:?} expects {got} participants but the barrier was built for {expected}")]
    ParticipantCountMismatch {
        participant: EntityId,
        expected: usize,
        got: usize,
    },
    #[error("participant {participant:?} arrived for instance {instance} which was already released (barrier is at {generation})")]
    ArrivalAfterRelease {
        participant: EntityId,
        instance: u64,
        generation: u64,
    },
    #[error("participant {participant:?} arrived for instance {instance} while the barrier is still collecting {generation}")]
    InstanceMismatch {
        participant: EntityId,
        instance: u64,
        generation: u64,
    },
}

/// A participant parked at the barrier, woken on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaiter {
    pub target: EntityId,
    pub phase: Phase,
}

/// Outcome of one arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    /// Still collecting participants for this instance.
    Waiting { arrived: usize, expected: usize },
    /// Same participant already arrived for this instance; count unchanged.
    Duplicate,
    /// This arrival completed the set. Every participant of the instance,
    /// the arriving one included, is listed in arrival order.
    Released { waiters: Vec<BarrierWaiter> },
}

#[derive(Debug)]
struct BarrierState {
    expected: usize,
    generation: u64,
    arrived: Vec<BarrierWaiter>,
}

/// Shared handle; clones refer to the same barrier.
#[derive(Clone)]
pub struct RendezvousBarrier(Rc<RefCell<BarrierState>>);

impl RendezvousBarrier {
    /// Barrier expecting `expected` participants per collective instance (at least one).
    pub fn new(expected: usize) -> Self {
        Self(Rc::new(RefCell::new(BarrierState {
            expected: expected.max(1),
            generation: 0,
            arrived: Vec::new(),
        })))
    }

    pub fn expected(&self) -> usize {
        self.0.borrow().expected
    }

    /// Index of the instance currently being collected.
    pub fn generation(&self) -> u64 {
        self.0.borrow().generation
    }

    pub fn arrived(&self) -> usize {
        self.0.borrow().arrived.len()
    }

    /// Register `waiter` for collective `instance`.
    ///
    /// `expected` is the participant count the caller was configured with and
    /// must match the barrier's own.
    pub fn arrive(
        &self,
        waiter: BarrierWaiter,
        expected: usize,
        instance: u64,
    ) -> Result<Arrival, BarrierError> {
        let mut st = self.0.borrow_mut();
        let participant = waiter.target;
        if expected.max(1) != st.expected {
            return Err(BarrierError::ParticipantCountMismatch {
                participant,
                expected: st.expected,
                got: expected,
            });
        }
        if instance < st.generation {
            return Err(BarrierError::ArrivalAfterRelease {
                participant,
                instance,
                generation: st.generation,
            });
        }
        if instance > st.generation {
            return Err(BarrierError::InstanceMismatch {
                participant,
                instance,
                generation: st.generation,
            });
        }
        if st.arrived.iter().any(|w| w.target == participant) {
            warn!(?participant, instance, "duplicate barrier arrival ignored");
            return Ok(Arrival::Duplicate);
        }

        st.arrived.push(waiter);
        let arrived = st.arrived.len();
        debug!(?participant, instance, arrived, expected = st.expected, "barrier arrival");
        if arrived < st.expected {
            return Ok(Arrival::Waiting {
                arrived,
                expected: st.expected,
            });
        }

        st.generation = st.generation.saturating_add(1);
        let waiters = std::mem::take(&mut st.arrived);
        debug!(instance, released = waiters.len(), "barrier released");
        Ok(Arrival::Released { waiters })
    }

    /// Drop any partial arrivals and start over from instance 0.
    pub fn reset(&self) {
        let mut st = self.0.borrow_mut();
        st.generation = 0;
        st.arrived.clear();
    }
}

impl fmt::Debug for RendezvousBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.0.borrow();
        f.debug_struct("RendezvousBarrier")
            .field("expected", &st.expected)
            .field("generation", &st.generation)
            .field("arrived", &st.arrived.len())
            .finish()
    }
}

/// How a phase synchronizes with its peers before issuing a collective.
#[derive(Debug, Clone, Default)]
pub enum CollectiveBarrier {
    /// Issue as soon as compute is done.
    #[default]
    NonBlocking,
    /// Rendezvous with every participant of the barrier first.
    Blocking(RendezvousBarrier),
}
