use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::cc::{DimLink, InvolvedDims, NetError, SchedulingPolicy};
use crate::layer::{LayerSpec, ParallelismPolicy, Phase, Roofline};

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("read workload: {0}")]
    Io(#[from] io::Error),
    #[error("parse workload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid workload: {0}")]
    Invalid(String),
    #[error(transparent)]
    Net(#[from] NetError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub schema_version: u32,
    #[serde(default)]
    pub meta: Option<WorkloadMeta>,
    pub system: SystemSpec,
    #[serde(default)]
    pub defaults: WorkloadDefaults,
    /// Participants training the same model (data-parallel replicas).
    #[serde(default = "one")]
    pub ranks: usize,
    /// Training steps to simulate.
    #[serde(default = "one_u32")]
    pub passes: u32,
    pub layers: Vec<LayerSpec>,
}

fn one() -> usize {
    1
}

fn one_u32() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadMeta {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub run_name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSpec {
    #[serde(flatten)]
    pub roofline: Roofline,
    /// Topology dimensions, innermost first.
    pub dims: Vec<DimLink>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BarrierMode {
    #[default]
    NonBlocking,
    Blocking,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadDefaults {
    pub parallelism: ParallelismPolicy,
    pub scheduling: SchedulingPolicy,
    pub barrier: BarrierMode,
    pub auto_issue: bool,
}

impl Default for WorkloadDefaults {
    fn default() -> Self {
        Self {
            parallelism: ParallelismPolicy::Data,
            scheduling: SchedulingPolicy::Fifo,
            barrier: BarrierMode::NonBlocking,
            auto_issue: true,
        }
    }
}

impl WorkloadSpec {
    pub fn from_json(raw: &str) -> Result<Self, WorkloadError> {
        let mut spec: WorkloadSpec = serde_json::from_str(raw)?;
        spec.normalize()?;
        Ok(spec)
    }

    pub fn load(path: &Path) -> Result<Self, WorkloadError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn run_name(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.run_name.as_deref())
    }

    /// Validate, and widen empty involved-dimension masks to every dimension.
    pub fn normalize(&mut self) -> Result<(), WorkloadError> {
        if self.layers.is_empty() {
            return Err(WorkloadError::Invalid("workload has no layers".into()));
        }
        if self.ranks == 0 {
            return Err(WorkloadError::Invalid("ranks must be at least 1".into()));
        }
        if self.passes == 0 {
            return Err(WorkloadError::Invalid("passes must be at least 1".into()));
        }
        let dims = self.system.dims.len();
        if dims == 0 {
            return Err(NetError::EmptyTopology.into());
        }
        for layer in &mut self.layers {
            for phase in Phase::ALL {
                let spec = match phase {
                    Phase::Forward => &mut layer.fwd,
                    Phase::InputGrad => &mut layer.input_grad,
                    Phase::WeightGrad => &mut layer.weight_grad,
                };
                if spec.involved_dims.is_empty() {
                    spec.involved_dims = InvolvedDims::all(dims);
                } else if spec.involved_dims.len() != dims {
                    return Err(WorkloadError::Invalid(format!(
                        "layer {} {phase}: involved_dims has {} entries, topology has {dims}",
                        layer.id,
                        spec.involved_dims.len()
                    )));
                }
            }
        }
        Ok(())
    }
}
