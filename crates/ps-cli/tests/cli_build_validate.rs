use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_probestat"))
}

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("probestat_cli_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn s(p: &Path) -> &str {
    p.to_str().unwrap()
}

fn json_columns(cols: &[(&str, Vec<f64>)]) -> String {
    let body: Vec<String> = cols
        .iter()
        .map(|(name, vals)| {
            let vals: Vec<String> = vals.iter().map(|v| format!("{v:?}")).collect();
            format!("\"{name}\": [{}]", vals.join(", "))
        })
        .collect();
    format!("{{{}}}", body.join(", "))
}

const N_CHANNELS: usize = 8;

/// Geometry, vertex and hit files for one small deterministic dataset.
/// All hit times fall in `[0, 250)`.
fn write_fixture(dir: &Path, tag: &str) -> (PathBuf, PathBuf, PathBuf) {
    let geometry = dir.join("geometry.json");
    std::fs::write(
        &geometry,
        json_columns(&[
            ("theta", vec![0.0, 45.0, 90.0, 135.0, 180.0, 90.0, 90.0, 60.0]),
            ("phi", vec![0.0, 0.0, 0.0, 0.0, 0.0, 90.0, 180.0, 270.0]),
        ]),
    )
    .unwrap();

    let n_vertices = 40;
    let (mut x, mut y, mut z) = (Vec::new(), Vec::new(), Vec::new());
    for i in 0..n_vertices {
        x.push(((i % 5) as f64 - 2.0) * 3000.0);
        y.push((((i / 5) % 4) as f64 - 1.5) * 3000.0);
        z.push(((i % 3) as f64 - 1.0) * 2000.0);
    }
    let vertices = dir.join(format!("vertices_{tag}.json"));
    std::fs::write(&vertices, json_columns(&[("x", x), ("y", y), ("z", z)])).unwrap();

    let (mut event_id, mut channel_id, mut time) = (Vec::new(), Vec::new(), Vec::new());
    for i in 0..n_vertices {
        for c in 0..N_CHANNELS {
            for h in 0..(i + c) % 3 {
                event_id.push(i as f64);
                channel_id.push(c as f64);
                time.push(10.0 + ((37 * (i * N_CHANNELS + c) + 11 * h) % 230) as f64);
            }
        }
    }
    let hits = dir.join(format!("hits_{tag}.json"));
    std::fs::write(
        &hits,
        json_columns(&[("event_id", event_id), ("channel_id", channel_id), ("time", time)]),
    )
    .unwrap();
    (geometry, vertices, hits)
}

fn stdout_json(out: &Output) -> serde_json::Value {
    assert!(
        out.status.success(),
        "command failed: status={:?}\nstderr={}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).unwrap_or_else(|e| {
        panic!("stdout is not JSON: {e}\n{}", String::from_utf8_lossy(&out.stdout))
    })
}

/// Build a table and the matching concat files; returns `(table, pe, pairs)`.
fn build_and_concat(dir: &Path, table_name: &str, t_bins: &str) -> (PathBuf, PathBuf, PathBuf) {
    let (geometry, vertices, hits) = write_fixture(dir, "a");
    let table = dir.join(table_name);
    let out = run(&[
        "build",
        "--geometry",
        s(&geometry),
        "--vertices",
        s(&vertices),
        "--hits",
        s(&hits),
        "--output",
        s(&table),
        "--bins",
        "2",
        "--t-bins",
        t_bins,
    ]);
    stdout_json(&out);

    let pe = dir.join("pe.json");
    let pairs = dir.join("pairs.json");
    let out = run(&[
        "concat",
        "--vertices",
        s(&vertices),
        "--hits",
        s(&hits),
        "--geometry",
        s(&geometry),
        "--pe",
        s(&pe),
        "--pairs",
        s(&pairs),
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    (table, pe, pairs)
}

#[test]
fn build_from_flags_writes_table_and_summary() {
    let dir = tmp_dir("build_flags");
    let (geometry, vertices, hits) = write_fixture(&dir, "a");
    let table = dir.join("probe.json");
    let out = run(&[
        "build",
        "--geometry",
        s(&geometry),
        "--vertices",
        s(&vertices),
        "--hits",
        s(&hits),
        "--output",
        s(&table),
        "--bins",
        "3",
        "--theta-bins",
        "4",
        "--t-bins",
        "5",
    ]);
    let v = stdout_json(&out);
    assert_eq!(v["r_bins"], 3);
    assert_eq!(v["theta_bins"], 4);
    assert_eq!(v["t_bins"], 5);
    assert_eq!(v["summary"]["n_vertices"], 40);
    assert_eq!(v["backfill"], "empty_cells");
    let means = v["slice_means"].as_array().unwrap();
    assert_eq!(means.len(), 5);
    assert!(means[0].as_f64().unwrap() > 0.0);
    // Every fixture hit lands before t = 250.
    assert_eq!(means[4].as_f64().unwrap(), 0.0);

    let file: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&table).unwrap()).unwrap();
    assert_eq!(file["schema_version"], "probestat_table_v1");
    assert_eq!(file["Probe"].as_array().unwrap().len(), 3);
    assert_eq!(file["r_edges"].as_array().unwrap().len(), 4);
}

#[test]
fn build_from_yaml_config_with_two_datasets_to_parquet() {
    let dir = tmp_dir("build_yaml");
    let (geometry, v_a, h_a) = write_fixture(&dir, "a");
    let (_, v_b, h_b) = write_fixture(&dir, "b");
    let table = dir.join("probe.parquet");
    let cfg = dir.join("build.yaml");
    let yaml = format!(
        r#"geometry: "{}"
datasets:
  - {{ vertices: "{}", hits: "{}" }}
  - {{ vertices: "{}", hits: "{}" }}
output: "{}"
bins: 2
t_bins: 1
threads: 2
backfill: zero_cells
"#,
        s(&geometry),
        s(&v_a),
        s(&h_a),
        s(&v_b),
        s(&h_b),
        s(&table)
    );
    std::fs::write(&cfg, yaml).unwrap();

    let out = run(&["build", "--config", s(&cfg)]);
    let v = stdout_json(&out);
    assert_eq!(v["summary"]["n_datasets"], 2);
    assert_eq!(v["summary"]["n_vertices"], 80);
    assert_eq!(v["backfill"], "zero_cells");
    assert!(table.exists());

    // Flags override the config file.
    let summary = dir.join("summary.json");
    let out = run(&["build", "--config", s(&cfg), "--bins", "3", "--summary", s(&summary)]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(v["r_bins"], 3);
    assert_eq!(v["t_bins"], 1);
}

#[test]
fn validate_is_reproducible_with_seed_and_logs_scores() {
    let dir = tmp_dir("validate");
    let (table, pe, pairs) = build_and_concat(&dir, "probe.parquet", "4");
    let log = dir.join("scores.csv");
    let args = [
        "validate",
        "--table",
        s(&table),
        "--pe",
        s(&pe),
        "--pairs",
        s(&pairs),
        "--seed",
        "42",
        "--n-vertices",
        "100",
        "--score-log",
        s(&log),
    ];
    let first = stdout_json(&run(&args));
    let second = stdout_json(&run(&args));
    assert_eq!(first, second);
    assert_eq!(first["model"], "Histogram");
    assert_eq!(first["consistency"]["seed"], 42);
    assert_eq!(first["consistency"]["passed"], true);
    assert!(first["score"].is_f64(), "{first}");

    let text = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let score = first["score"].as_f64().unwrap();
    let logged: f64 = lines[0].split(',').next().unwrap().parse().unwrap();
    assert_eq!(logged, score);
}

#[test]
fn validate_constant_model_uses_table_mean() {
    let dir = tmp_dir("validate_const");
    let (table, pe, pairs) = build_and_concat(&dir, "probe.json", "4");
    let out = run(&[
        "validate",
        "--table",
        s(&table),
        "--pe",
        s(&pe),
        "--pairs",
        s(&pairs),
        "--model",
        "constant",
        "--seed",
        "1",
        "--n-vertices",
        "20",
        "--n-times",
        "100",
    ]);
    let v = stdout_json(&out);
    assert_eq!(v["model"], "Constant");
    assert_eq!(v["n_zero_rate_hits"], 0);
}

#[test]
fn validate_single_time_point_is_rounded_to_table_grid() {
    let dir = tmp_dir("validate_one_point");
    let (table, pe, pairs) = build_and_concat(&dir, "probe.json", "4");
    // One midpoint at T_max/2 would miss every hit; the grid rounds it up to 4 points.
    let out = run(&[
        "validate",
        "--table",
        s(&table),
        "--pe",
        s(&pe),
        "--pairs",
        s(&pairs),
        "--seed",
        "3",
        "--n-times",
        "1",
    ]);
    let v = stdout_json(&out);
    assert_eq!(v["consistency"]["n_times"], 4);
    assert_eq!(v["consistency"]["passed"], true);
}

#[test]
fn validate_three_slice_table_with_default_points() {
    let dir = tmp_dir("validate_three_slices");
    let (table, pe, pairs) = build_and_concat(&dir, "probe.json", "3");
    let out = run(&[
        "validate",
        "--table",
        s(&table),
        "--pe",
        s(&pe),
        "--pairs",
        s(&pairs),
        "--seed",
        "5",
        "--n-vertices",
        "50",
    ]);
    let v = stdout_json(&out);
    assert_eq!(v["consistency"]["n_failed"], 0);
    assert_eq!(v["consistency"]["n_times"], 10_002);
}

#[test]
fn validate_missing_table_exits_1() {
    let dir = tmp_dir("validate_missing");
    let missing = dir.join("nope.json");
    let out = run(&[
        "validate",
        "--table",
        s(&missing),
        "--pe",
        s(&dir.join("pe.json")),
        "--pairs",
        s(&dir.join("pairs.json")),
    ]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("nope.json"));
}

#[test]
fn diagnose_writes_profiles() {
    let dir = tmp_dir("diagnose");
    let (table, pe, pairs) = build_and_concat(&dir, "probe.json", "4");
    let output = dir.join("diag.json");
    let out = run(&[
        "diagnose",
        "--table",
        s(&table),
        "--pe",
        s(&pe),
        "--pairs",
        s(&pairs),
        "--curve-points",
        "101",
        "--grid-r-bins",
        "5",
        "--grid-theta-bins",
        "8",
        "--output",
        s(&output),
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(v["profiles"].as_array().unwrap().len(), 7);
    assert_eq!(v["pie"]["values"].as_array().unwrap().len(), 5);
    assert_eq!(v["closure"]["ratio"][0].as_array().unwrap().len(), 8);
    assert_eq!(v["profiles"][0]["times"].as_array().unwrap().len(), 101);
}

#[test]
fn version_prints_crate_version() {
    let out = run(&["version"]);
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.starts_with("probestat "), "{text}");
}
