//! Tabular sinks: CSV rows over any writer.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::stats::LayerStats;

pub const DETAILED_COLUMNS: &[&str] = &[
    "run_name",
    "layer_num",
    "total_rows",
    "stat_row",
    "layer",
    "fwd_compute",
    "ig_compute",
    "wg_compute",
    "fwd_comm",
    "ig_comm",
    "wg_comm",
    "fwd_exposed",
    "ig_exposed",
    "wg_exposed",
    "weight_update",
];

pub const END_TO_END_COLUMNS: &[&str] = &[
    "run_name",
    "layer_num",
    "layer",
    "total_compute",
    "total_comm",
    "total_exposed",
    "exposed_fraction",
];

pub const OI_COLUMNS: &[&str] = &[
    "run_name",
    "layer_num",
    "layer",
    "fwd_oi",
    "ig_oi",
    "wg_oi",
    "fwd_compute_bound",
    "ig_compute_bound",
    "wg_compute_bound",
];

/// Header-once CSV writer.
pub struct TableSink {
    out: Box<dyn Write>,
    columns: &'static [&'static str],
    wrote_header: bool,
    rows: usize,
}

impl TableSink {
    pub fn new(out: Box<dyn Write>, columns: &'static [&'static str]) -> Self {
        Self {
            out,
            columns,
            wrote_header: false,
            rows: 0,
        }
    }

    pub fn create(path: &Path, columns: &'static [&'static str]) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file)), columns))
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn write_row(&mut self, cells: &[String]) -> io::Result<()> {
        if cells.len() != self.columns.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("row has {} cells, table has {} columns", cells.len(), self.columns.len()),
            ));
        }
        if !self.wrote_header {
            let header: Vec<String> = self.columns.iter().map(|c| c.to_string()).collect();
            write_line(&mut self.out, &header)?;
            self.wrote_header = true;
        }
        write_line(&mut self.out, cells)?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

fn write_line(out: &mut dyn Write, cells: &[String]) -> io::Result<()> {
    let line: Vec<String> = cells.iter().map(|c| escape(c)).collect();
    writeln!(out, "{}", line.join(","))
}

fn escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Row context supplied by the caller of `Layer::report`.
#[derive(Debug, Clone, Copy)]
pub struct ReportArgs<'a> {
    pub run_name: &'a str,
    pub layer_num: usize,
    pub total_rows: usize,
    pub stat_row: usize,
    /// Write the detailed per-phase rows as well.
    pub separate_log: bool,
}

/// Detailed log, end-to-end summary and operational-intensity summary.
#[derive(Default)]
pub struct ReportSinks {
    pub detailed: Option<TableSink>,
    pub end_to_end: Option<TableSink>,
    pub oi: Option<TableSink>,
}

impl ReportSinks {
    pub fn none() -> Self {
        Self::default()
    }

    /// `detailed.csv`, `end_to_end.csv` and `oi.csv` under `dir`.
    pub fn in_dir(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            detailed: Some(TableSink::create(&dir.join("detailed.csv"), DETAILED_COLUMNS)?),
            end_to_end: Some(TableSink::create(&dir.join("end_to_end.csv"), END_TO_END_COLUMNS)?),
            oi: Some(TableSink::create(&dir.join("oi.csv"), OI_COLUMNS)?),
        })
    }

    pub fn write_layer(&mut self, args: &ReportArgs<'_>, s: &LayerStats) -> io::Result<()> {
        let run = args.run_name.to_string();
        let num = args.layer_num.to_string();
        if args.separate_log {
            if let Some(sink) = self.detailed.as_mut() {
                sink.write_row(&[
                    run.clone(),
                    num.clone(),
                    args.total_rows.to_string(),
                    args.stat_row.to_string(),
                    s.layer_name.clone(),
                    s.fwd.compute.0.to_string(),
                    s.input_grad.compute.0.to_string(),
                    s.weight_grad.compute.0.to_string(),
                    s.fwd.comm.0.to_string(),
                    s.input_grad.comm.0.to_string(),
                    s.weight_grad.comm.0.to_string(),
                    s.fwd.exposed.0.to_string(),
                    s.input_grad.exposed.0.to_string(),
                    s.weight_grad.exposed.0.to_string(),
                    s.weight_update.0.to_string(),
                ])?;
            }
        }
        if let Some(sink) = self.end_to_end.as_mut() {
            sink.write_row(&[
                run.clone(),
                num.clone(),
                s.layer_name.clone(),
                s.total_compute.0.to_string(),
                s.total_comm.0.to_string(),
                s.total_exposed.0.to_string(),
                format!("{:.6}", s.exposed_fraction),
            ])?;
        }
        if let Some(sink) = self.oi.as_mut() {
            sink.write_row(&[
                run,
                num,
                s.layer_name.clone(),
                s.fwd.oi.to_string(),
                s.input_grad.oi.to_string(),
                s.weight_grad.oi.to_string(),
                s.fwd.compute_bound.to_string(),
                s.input_grad.compute_bound.to_string(),
                s.weight_grad.compute_bound.to_string(),
            ])?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        for sink in [&mut self.detailed, &mut self.end_to_end, &mut self.oi]
            .into_iter()
            .flatten()
        {
            sink.flush()?;
        }
        Ok(())
    }
}
