//! Derived statistics records.

use serde::Serialize;

use crate::sim::Tick;

/// Counters of one phase at report time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseStats {
    pub compute: Tick,
    pub comm: Tick,
    pub exposed: Tick,
    pub oi: f64,
    pub compute_bound: bool,
    pub issued: u64,
    pub last_finished: Tick,
}

/// Per-layer statistics record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerStats {
    pub layer_name: String,
    pub layer_num: usize,
    pub fwd: PhaseStats,
    pub input_grad: PhaseStats,
    pub weight_grad: PhaseStats,
    pub weight_update: Tick,
    pub total_compute: Tick,
    pub total_comm: Tick,
    pub total_exposed: Tick,
    /// exposed / (compute + exposed); 0 when both are zero.
    pub exposed_fraction: f64,
}

impl LayerStats {
    pub fn new(
        layer_name: String,
        layer_num: usize,
        fwd: PhaseStats,
        input_grad: PhaseStats,
        weight_grad: PhaseStats,
        weight_update: Tick,
    ) -> Self {
        let phases = [&fwd, &input_grad, &weight_grad];
        let sum = |f: fn(&PhaseStats) -> Tick| {
            phases.iter().map(|p| f(p)).fold(Tick::ZERO, Tick::saturating_add)
        };
        let total_compute = sum(|p| p.compute);
        let total_comm = sum(|p| p.comm);
        let total_exposed = sum(|p| p.exposed);
        Self {
            layer_name,
            layer_num,
            fwd,
            input_grad,
            weight_grad,
            weight_update,
            total_compute,
            total_comm,
            total_exposed,
            exposed_fraction: fraction(total_exposed, total_compute.saturating_add(total_exposed)),
        }
    }
}

pub(crate) fn fraction(part: Tick, whole: Tick) -> f64 {
    if whole.0 == 0 {
        0.0
    } else {
        part.0 as f64 / whole.0 as f64
    }
}
