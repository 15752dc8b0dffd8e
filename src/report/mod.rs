//! Statistics records, tabular sinks and run aggregation.

mod aggregate;
mod stats;
mod table;

pub use aggregate::{ReportAggregator, RunTotals};
pub use stats::{LayerStats, PhaseStats};
pub use table::{
    DETAILED_COLUMNS, END_TO_END_COLUMNS, OI_COLUMNS, ReportArgs, ReportSinks, TableSink,
};
