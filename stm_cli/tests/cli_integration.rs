use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Sim config with no settling delays and an unfiltered, hum-free TIA.
const FAST_SIM: &str = r#"
[controller]
settle_us = 0

[acquisition]
calibrate_settle_ms = 0

[filter]
enabled = false

[sim]
hum_counts = 0.0
"#;

fn write_config(dir: &tempfile::TempDir, extra: &str) -> PathBuf {
    let path = dir.path().join("stm.toml");
    fs::write(&path, format!("{FAST_SIM}\n{extra}")).unwrap();
    path
}

fn stm(cfg: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("stm").unwrap();
    cmd.arg("--config").arg(cfg);
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["calibrate"], 0, "zero-current baseline", "stdout")]
#[case(&["approach"], 0, "surface found", "stdout")]
#[case(&["jog", "--steps", "-5"], 0, "stepper offset: -5", "stdout")]
#[case(&["jog", "--steps", "5", "--rate", "0"], 0, "stepper offset: 0", "stdout")]
#[case(&["self-check"], 0, "self-check ok", "stdout")]
#[case(&["scan-line"], 2, "required", "stderr")]
#[case(&["approach", "--max-polls", "10"], 5, "10 controller polls", "stderr")]
#[case(&["approach", "--setpoint-pa", "15000"], 3, "overcurrent", "stderr")]
#[case(&["approach", "--setpoint-pa", "0"], 1, "setpoint must be a positive", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");

    let mut cmd = stm(&cfg);
    for a in args {
        cmd.arg(a);
    }
    let assert = cmd.assert().code(exit_code);

    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[test]
fn line_scan_writes_one_row_per_point_to_stdout() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");

    let out = stm(&cfg)
        .args(["scan-line", "--size", "10"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let text = String::from_utf8(out.stdout).unwrap();
    let rows: Vec<&str> = text.lines().collect();
    assert_eq!(rows.len(), 10);
    for (i, row) in rows.iter().enumerate() {
        let cols: Vec<&str> = row.split(',').collect();
        assert_eq!(cols.len(), 3);
        assert_eq!(cols[0], i.to_string());
        assert!(cols[1].parse::<f64>().unwrap().is_finite());
    }
}

#[test]
fn area_scan_out_file_gets_rows_and_stdout_a_summary() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    let csv = dir.path().join("area.csv");

    stm(&cfg)
        .args(["scan-area", "--size-x", "3", "--size-y", "2", "--out"])
        .arg(&csv)
        .assert()
        .success()
        .stdout(predicate::str::contains("area scan: 6 points"));

    let text = fs::read_to_string(&csv).unwrap();
    let coords: Vec<(i32, i32)> = text
        .lines()
        .map(|l| {
            let cols: Vec<&str> = l.split(',').collect();
            (cols[3].parse().unwrap(), cols[4].parse().unwrap())
        })
        .collect();
    assert_eq!(coords, [(0, 0), (1, 0), (2, 0), (2, 1), (1, 1), (0, 1)]);
}

#[test]
fn approach_dump_and_json_result() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    let dump = dir.path().join("approach.csv");

    let out = stm(&cfg)
        .args(["--json", "approach", "--dump"])
        .arg(&dump)
        .output()
        .unwrap();
    assert!(out.status.success());
    let line = String::from_utf8(out.stdout).unwrap();
    let v: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(v["state"], "Surface");
    assert!(v["current_pa"].as_f64().unwrap() > 500.0);
    assert!(v["stepper"].as_i64().unwrap() > 0);

    let rows = fs::read_to_string(&dump).unwrap();
    assert!(!rows.is_empty());
    assert!(rows.lines().all(|l| l.split(',').count() == 2));
}

#[test]
fn poll_limit_reports_json_reason() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");

    let out = stm(&cfg)
        .args(["--json", "approach", "--max-polls", "10"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(5));
    let v: serde_json::Value =
        serde_json::from_str(String::from_utf8(out.stdout).unwrap().trim()).unwrap();
    assert_eq!(v["reason"], "PollLimit");
    assert_eq!(v["details"]["limit"], 10);
}

#[test]
fn scan_past_the_travel_limit_is_unattainable() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "[scan]\nstep = 4096\n");

    stm(&cfg)
        .args(["scan-line", "--size", "40000"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("outside the piezo travel"));
}

#[test]
fn sagging_rail_fails_self_check() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "[sim]\nrails = [488, 400, 492]\n");

    stm(&cfg)
        .arg("self-check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("supply rail check failed"))
        .stderr(predicate::str::contains("10V FAIL (400/573)"));
}

#[test]
fn bad_filter_csv_header_is_reported() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("notch.csv"), "b0,b1\n1.0,0.0\n").unwrap();
    let cfg = write_config(&dir, "");
    let text = fs::read_to_string(&cfg)
        .unwrap()
        .replace("enabled = false", "enabled = true\nsections_file = \"notch.csv\"");
    fs::write(&cfg, text).unwrap();

    stm(&cfg)
        .arg("self-check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers"));
}

#[test]
fn missing_config_file_is_a_config_error() {
    Command::cargo_bin("stm")
        .unwrap()
        .args(["--config", "/nonexistent/stm.toml", "calibrate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("config file could not be loaded"));
}
