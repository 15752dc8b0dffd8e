//! Static, per-layer configuration fixed at workload setup.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cc::{ComType, InvolvedDims};
use crate::sim::Tick;

/// One of the three compute + communicate cycles of a layer per training step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Forward,
    InputGrad,
    WeightGrad,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Forward, Phase::InputGrad, Phase::WeightGrad];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Forward => "fwd",
            Phase::InputGrad => "ig",
            Phase::WeightGrad => "wg",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static parameters of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    /// Operational intensity used for the roofline decision.
    #[serde(default)]
    pub oi: f64,
    pub compute_time: Tick,
    /// Bandwidth-bound compute time; defaults to `compute_time`.
    #[serde(default)]
    pub compute_time_roofline: Option<Tick>,
    #[serde(default)]
    pub comm_type: ComType,
    #[serde(default)]
    pub comm_size: u64,
    #[serde(default)]
    pub involved_dims: InvolvedDims,
}

impl PhaseSpec {
    /// Phase with compute only.
    pub fn compute_only(compute_time: Tick) -> Self {
        Self {
            oi: 0.0,
            compute_time,
            compute_time_roofline: None,
            comm_type: ComType::None,
            comm_size: 0,
            involved_dims: InvolvedDims::default(),
        }
    }

    pub fn roofline_time(&self) -> Tick {
        self.compute_time_roofline.unwrap_or(self.compute_time)
    }
}

/// Global parallelization strategies a layer may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelismPolicy {
    #[default]
    Data,
    Model,
    Transformer,
    TransformerFwdInBckwd,
    Micro,
    HybridDataModel,
    HybridModelData,
    HybridCustomized,
    DistributedInference,
    None,
}

/// Construction parameters of one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub id: String,
    pub fwd: PhaseSpec,
    pub input_grad: PhaseSpec,
    pub weight_grad: PhaseSpec,
    /// Optimizer update applied before the next forward pass uses the weights.
    #[serde(default)]
    pub weight_grad_update_time: Tick,
    #[serde(default)]
    pub needs_fwd_in_bckwd_initiation: bool,
    #[serde(default)]
    pub is_checkpoint: bool,
    /// Absent means the workload's global policy applies.
    #[serde(default)]
    pub parallelism: Option<ParallelismPolicy>,
}

impl LayerSpec {
    pub fn phase(&self, phase: Phase) -> &PhaseSpec {
        match phase {
            Phase::Forward => &self.fwd,
            Phase::InputGrad => &self.input_grad,
            Phase::WeightGrad => &self.weight_grad,
        }
    }
}

/// Hardware ridge point separating compute-bound from bandwidth-bound phases.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Roofline {
    /// `None` disables the roofline model; theoretical compute time is used.
    #[serde(default)]
    pub ridge_point: Option<f64>,
}

impl Roofline {
    pub fn with_ridge(ridge_point: f64) -> Self {
        Self {
            ridge_point: Some(ridge_point),
        }
    }

    /// Intensity at or above the ridge point is compute-bound.
    pub fn is_compute_bound(&self, oi: f64) -> bool {
        match self.ridge_point {
            Some(ridge) => oi >= ridge,
            None => true,
        }
    }

    pub fn select(&self, spec: &PhaseSpec) -> Tick {
        if self.is_compute_bound(spec.oi) {
            spec.compute_time
        } else {
            spec.roofline_time()
        }
    }
}
