//! Network-facing issuance API used by layers.
//!
//! The layer core never models collective algorithms itself: it hands a
//! `CollectiveRequest` to a `CollectiveIssuer` and gets back an owned
//! `OutstandingOp`. The issuer schedules a `CommFinished` callback for the
//! completion target when the modeled transfer ends.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::collective::{ComType, InvolvedDims, SchedulingPolicy};
use super::outstanding::{OpId, OutstandingOp};
use crate::layer::Phase;
use crate::sim::{CallData, CallbackEvent, EntityId, EventType, Simulator, Tick};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetError {
    #[error("involved-dimension mask has {got} entries but the topology has {expected} dimensions")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("dimension {dim} has zero bandwidth")]
    ZeroBandwidth { dim: usize },
    #[error("topology must have at least one dimension")]
    EmptyTopology,
}

/// One collective the layer wants the network to carry.
#[derive(Debug, Clone, Copy)]
pub struct CollectiveRequest<'a> {
    pub com_type: ComType,
    pub size_bytes: u64,
    pub dims: &'a InvolvedDims,
    pub scheduling: SchedulingPolicy,
}

/// Where the completion callback for an issued collective goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub target: EntityId,
    pub phase: Phase,
    pub op: OpId,
}

impl Completion {
    /// Schedule the `CommFinished` callback for this completion at `at`.
    pub fn schedule(self, at: Tick, sim: &mut Simulator) {
        sim.schedule(
            at,
            CallbackEvent {
                target: self.target,
                event: EventType::CommFinished,
                data: CallData::Comm {
                    phase: self.phase,
                    op: self.op,
                },
            },
        );
    }
}

/// Issues collectives on behalf of layers. Never blocks.
pub trait CollectiveIssuer {
    /// Dimensionality of the topology; involved-dimension masks must match it.
    fn dims(&self) -> usize;

    fn issue(
        &mut self,
        req: &CollectiveRequest<'_>,
        completion: Completion,
        sim: &mut Simulator,
    ) -> Result<OutstandingOp, NetError>;
}

/// Per-dimension link parameters of the analytic topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimLink {
    /// Peers along this dimension.
    pub npus: usize,
    pub bandwidth_gbps: u64,
    #[serde(default)]
    pub latency_ns: u64,
}

/// Closed-form collective model: ring steps per crossed dimension, each step
/// paying latency plus serialization of one chunk.
///
/// Occupancy is tracked per `(rank, dimension)`: every rank drives its own
/// links, so peers issuing their share of the same collective do not queue
/// behind each other.
#[derive(Debug, Clone)]
pub struct AnalyticNetwork {
    links: Vec<DimLink>,
    busy_until: HashMap<(usize, usize), Tick>,
    issued: u64,
}

impl AnalyticNetwork {
    pub fn new(links: Vec<DimLink>) -> Result<Self, NetError> {
        if links.is_empty() {
            return Err(NetError::EmptyTopology);
        }
        if let Some(dim) = links.iter().position(|l| l.bandwidth_gbps == 0) {
            return Err(NetError::ZeroBandwidth { dim });
        }
        Ok(Self {
            links,
            busy_until: HashMap::new(),
            issued: 0,
        })
    }

    /// Number of collectives issued so far.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Modeled duration of a collective ignoring contention.
    pub fn modeled_duration(&self, com_type: ComType, size_bytes: u64, dims: &InvolvedDims) -> Tick {
        dims.involved()
            .filter_map(|d| self.links.get(d))
            .map(|link| {
                let steps = com_type.total_steps(link.npus) as u64;
                let chunk = com_type.chunk_bytes(size_bytes, link.npus);
                // 1 Gbps == 1 bit/ns
                let ser_ns = chunk
                    .saturating_mul(8)
                    .saturating_add(link.bandwidth_gbps - 1)
                    / link.bandwidth_gbps;
                steps.saturating_mul(link.latency_ns.saturating_add(ser_ns))
            })
            .fold(Tick::ZERO, |acc, ns| acc.saturating_add(Tick(ns)))
    }
}

impl CollectiveIssuer for AnalyticNetwork {
    fn dims(&self) -> usize {
        self.links.len()
    }

    #[tracing::instrument(level = "debug", skip(self, sim), fields(com_type = %req.com_type, size = req.size_bytes))]
    fn issue(
        &mut self,
        req: &CollectiveRequest<'_>,
        completion: Completion,
        sim: &mut Simulator,
    ) -> Result<OutstandingOp, NetError> {
        if req.dims.len() != self.links.len() {
            return Err(NetError::DimensionMismatch {
                expected: self.links.len(),
                got: req.dims.len(),
            });
        }
        let now = sim.now();
        let duration = self.modeled_duration(req.com_type, req.size_bytes, req.dims);
        let rank = match completion.target {
            EntityId::Layer { rank, .. } => rank,
            EntityId::Workload => 0,
        };
        let keys: Vec<(usize, usize)> = req.dims.involved().map(|d| (rank, d)).collect();

        let start = match req.scheduling {
            SchedulingPolicy::Fifo => keys
                .iter()
                .filter_map(|k| self.busy_until.get(k).copied())
                .fold(now, Tick::max),
            SchedulingPolicy::Lifo | SchedulingPolicy::None => now,
        };
        let finish = start.saturating_add(duration);
        match req.scheduling {
            SchedulingPolicy::Fifo => {
                for k in keys {
                    self.busy_until.insert(k, finish);
                }
            }
            SchedulingPolicy::Lifo => {
                for k in keys {
                    let busy = self.busy_until.entry(k).or_insert(now);
                    *busy = (*busy).max(now).saturating_add(duration);
                }
            }
            SchedulingPolicy::None => {}
        }

        self.issued = self.issued.saturating_add(1);
        debug!(op = %completion.op, ?start, ?finish, ?duration, "collective scheduled");
        completion.schedule(finish, sim);
        Ok(OutstandingOp::new(
            completion.op,
            req.com_type,
            req.size_bytes,
            now,
        ))
    }
}
