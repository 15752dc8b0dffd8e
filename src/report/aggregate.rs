//! Folds per-layer statistics into run-wide totals.

use std::io;

use serde::Serialize;
use tracing::info;

use super::stats::LayerStats;
use super::table::{ReportArgs, ReportSinks};
use crate::layer::Layer;
use crate::sim::Tick;

/// Run-wide totals over a set of layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunTotals {
    pub run_name: String,
    pub total_compute: f64,
    pub total_exposed: f64,
    pub layers: Vec<LayerStats>,
}

impl RunTotals {
    pub fn exposed_fraction(&self) -> f64 {
        let whole = self.total_compute + self.total_exposed;
        if whole <= 0.0 {
            0.0
        } else {
            self.total_exposed / whole
        }
    }

    /// Totals of already collected records; independent of their order.
    pub fn from_stats(run_name: impl Into<String>, layers: Vec<LayerStats>) -> Self {
        let total_compute = layers.iter().map(|s| s.total_compute.0 as f64).sum();
        let total_exposed = layers.iter().map(|s| s.total_exposed.0 as f64).sum();
        Self {
            run_name: run_name.into(),
            total_compute,
            total_exposed,
            layers,
        }
    }

    pub fn total_comm(&self) -> Tick {
        self.layers
            .iter()
            .map(|s| s.total_comm)
            .fold(Tick::ZERO, Tick::saturating_add)
    }
}

/// Drives `Layer::report` over a whole layer stack.
#[derive(Debug, Clone)]
pub struct ReportAggregator {
    pub run_name: String,
    pub stat_row: usize,
    pub separate_log: bool,
}

impl ReportAggregator {
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
            stat_row: 0,
            separate_log: false,
        }
    }

    pub fn separate_log(mut self, on: bool) -> Self {
        self.separate_log = on;
        self
    }

    pub fn report(&self, layers: &[Layer], sinks: &mut ReportSinks) -> io::Result<RunTotals> {
        let mut total_compute = 0.0;
        let mut total_exposed = 0.0;
        let mut stats = Vec::with_capacity(layers.len());
        for layer in layers {
            let args = ReportArgs {
                run_name: &self.run_name,
                layer_num: layer.layer_num,
                total_rows: layers.len(),
                stat_row: self.stat_row,
                separate_log: self.separate_log,
            };
            stats.push(layer.report(&args, sinks, &mut total_compute, &mut total_exposed)?);
        }
        sinks.flush()?;

        let totals = RunTotals {
            run_name: self.run_name.clone(),
            total_compute,
            total_exposed,
            layers: stats,
        };
        info!(
            run = %totals.run_name,
            layers = totals.layers.len(),
            total_compute = totals.total_compute,
            total_exposed = totals.total_exposed,
            exposed_fraction = totals.exposed_fraction(),
            "📊 run totals"
        );
        Ok(totals)
    }
}
