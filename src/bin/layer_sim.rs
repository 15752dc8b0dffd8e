use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use trainsim_rs::report::{ReportSinks, RunTotals};
use trainsim_rs::sim::{Simulator, Tick};
use trainsim_rs::workload::{TrainWorld, Workload, WorkloadSpec};

#[derive(Debug, Parser)]
#[command(
    name = "layer-sim",
    about = "Simulate per-layer compute/communication overlap of a training workload"
)]
struct Args {
    /// Path to workload.json
    #[arg(long)]
    workload: PathBuf,

    /// Run name used in report rows (defaults to meta.run_name or the file stem)
    #[arg(long)]
    run_name: Option<String>,

    /// Override the number of training passes
    #[arg(long)]
    passes: Option<u32>,

    /// Directory for detailed.csv / end_to_end.csv / oi.csv
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Also write the detailed per-phase rows
    #[arg(long)]
    separate_log: bool,

    /// Write run totals as JSON
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Stop after this simulated time (ms); defaults to running until completion
    #[arg(long)]
    until_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct Summary {
    run_name: String,
    finished: bool,
    makespan_ns: Option<u64>,
    events: u64,
    ranks: Vec<RunTotals>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "layer-sim failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut spec = WorkloadSpec::load(&args.workload)?;
    if let Some(passes) = args.passes {
        spec.passes = passes.max(1);
    }
    let run_name = args
        .run_name
        .clone()
        .or_else(|| spec.run_name().map(str::to_string))
        .or_else(|| {
            args.workload
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "run".to_string());

    let mut sim = Simulator::default();
    let mut world = TrainWorld::from_spec(&spec)?;
    Workload::start(&mut sim);
    match args.until_ms {
        Some(ms) => sim.run_until(Tick::from_millis(ms), &mut world),
        None => sim.run(&mut world),
    }

    let workload = &world.workload;
    let finished = workload.is_finished();
    if !finished {
        tracing::warn!(now = ?sim.now(), "workload did not finish");
    }

    let mut sinks = match &args.out_dir {
        Some(dir) => ReportSinks::in_dir(dir)?,
        None => ReportSinks::none(),
    };
    let ranks = workload.report(&run_name, args.separate_log, &mut sinks)?;

    for totals in &ranks {
        println!(
            "run={} layers={} total_compute={} total_exposed={} total_comm={} exposed_fraction={:.4}",
            totals.run_name,
            totals.layers.len(),
            totals.total_compute,
            totals.total_exposed,
            totals.total_comm().0,
            totals.exposed_fraction()
        );
    }
    let makespan = workload.makespan();
    println!(
        "finished={} makespan_ns={}",
        finished,
        makespan.map(|t| t.0.to_string()).unwrap_or_else(|| "-".into())
    );

    if let Some(path) = &args.summary_json {
        let summary = Summary {
            run_name,
            finished,
            makespan_ns: makespan.map(|t| t.0),
            events: sim.executed(),
            ranks,
        };
        fs::write(path, serde_json::to_string_pretty(&summary)?)?;
    }
    Ok(())
}
