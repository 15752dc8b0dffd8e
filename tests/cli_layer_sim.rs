use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "trainsim-rs-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write temp file");
    path
}

const WORKLOAD: &str = r#"
{
    "schema_version": 1,
    "meta": { "run_name": "tiny" },
    "system": { "dims": [ { "npus": 4, "bandwidth_gbps": 100 } ] },
    "passes": 2,
    "layers": [
        {
            "id": "l0",
            "fwd": { "compute_time": 100 },
            "input_grad": { "compute_time": 50 },
            "weight_grad": { "compute_time": 200, "comm_type": "ALLREDUCE", "comm_size": 800 }
        },
        {
            "id": "l1",
            "fwd": { "compute_time": 100 },
            "input_grad": { "compute_time": 50 },
            "weight_grad": { "compute_time": 200, "comm_type": "ALLREDUCE", "comm_size": 800 }
        }
    ]
}
"#;

fn layer_sim(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_layer_sim"))
        .args(args)
        .output()
        .expect("run layer_sim")
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "layer_sim failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn layer_sim_prints_run_totals() {
    let dir = unique_temp_dir("layer-sim-stdout");
    let workload = write_file(&dir, "workload.json", WORKLOAD);

    let output = layer_sim(&["--workload", workload.to_str().unwrap()]);
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert!(
        lines.contains(
            &"run=tiny layers=2 total_compute=1300 total_exposed=192 total_comm=384 exposed_fraction=0.1287"
        ),
        "stdout={stdout}"
    );
    assert!(lines.contains(&"finished=true makespan_ns=1492"), "stdout={stdout}");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn layer_sim_writes_csv_reports_and_summary() {
    let dir = unique_temp_dir("layer-sim-csv");
    let workload = write_file(&dir, "workload.json", WORKLOAD);
    let out_dir = dir.join("out");
    let summary = dir.join("summary.json");

    let output = layer_sim(&[
        "--workload",
        workload.to_str().unwrap(),
        "--run-name",
        "csv",
        "--out-dir",
        out_dir.to_str().unwrap(),
        "--separate-log",
        "--summary-json",
        summary.to_str().unwrap(),
    ]);
    assert_success(&output);

    for name in ["detailed.csv", "end_to_end.csv", "oi.csv"] {
        let raw = fs::read_to_string(out_dir.join(name)).expect("read csv");
        let rows: Vec<&str> = raw.lines().collect();
        assert_eq!(rows.len(), 3, "{name}: {raw}");
        assert!(rows[0].starts_with("run_name,layer_num"), "{name}: {raw}");
        assert!(rows[1].starts_with("csv,0,"), "{name}: {raw}");
    }

    let raw = fs::read_to_string(&summary).expect("read summary.json");
    let v: Value = serde_json::from_str(&raw).expect("parse summary.json");
    assert_eq!(v.get("run_name").and_then(Value::as_str), Some("csv"));
    assert_eq!(v.get("finished").and_then(Value::as_bool), Some(true));
    assert_eq!(v.get("makespan_ns").and_then(Value::as_u64), Some(1492));
    let ranks = v.get("ranks").and_then(Value::as_array).expect("ranks array");
    assert_eq!(ranks.len(), 1);
    assert_eq!(ranks[0].get("total_exposed").and_then(Value::as_f64), Some(192.0));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn layer_sim_stops_early_with_until_ms() {
    let dir = unique_temp_dir("layer-sim-until");
    let workload = write_file(&dir, "workload.json", WORKLOAD);

    let output = layer_sim(&["--workload", workload.to_str().unwrap(), "--until-ms", "0"]);
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("finished=false makespan_ns=-"), "stdout={stdout}");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn layer_sim_rejects_invalid_workload() {
    let dir = unique_temp_dir("layer-sim-invalid");
    let workload = write_file(
        &dir,
        "workload.json",
        r#"{ "schema_version": 1, "system": { "dims": [] }, "layers": [] }"#,
    );

    let output = layer_sim(&["--workload", workload.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid workload"), "stderr={stderr}");

    let _ = fs::remove_dir_all(&dir);
}
