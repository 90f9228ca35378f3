mod common;

use std::fs;

use assert_cmd::Command;
use common::TestWorkspace;
use csv_reconcile::config::ReconcileConfig;
use predicates::str::contains;

fn reconcile() -> Command {
    let mut command = Command::cargo_bin("csv-reconcile").expect("binary exists");
    command.env_remove("RUST_LOG");
    command
}

#[test]
fn compare_writes_report_and_summary() {
    let workspace = TestWorkspace::new();
    let a = workspace.write("a.csv", "id,v\n1,x\n2,y\n");
    let b = workspace.write("b.csv", "id,v\n2,y\n3,z\n");
    let summary = workspace.path().join("summary.json");

    reconcile()
        .args(["compare", "-a"])
        .arg(&a)
        .arg("-b")
        .arg(&b)
        .args(["--analysis", "missing", "--output-dir"])
        .arg(workspace.path())
        .arg("--summary-json")
        .arg(&summary)
        .assert()
        .success()
        .stderr(contains("Report with"));

    assert!(workspace.path().join("REPORT_MISSING.xlsx").exists());
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&summary).expect("read summary"))
            .expect("parse summary");
    assert_eq!(json["precision"]["common"], 1);
    assert_eq!(json["precision"]["percent_missing_in_a"], 50.0);
}

#[test]
fn compare_with_unknown_key_fails_with_context() {
    let workspace = TestWorkspace::new();
    let a = workspace.write("a.csv", "id,v\n1,x\n");
    let b = workspace.write("b.csv", "id,v\n2,y\n");

    reconcile()
        .args(["compare", "-a"])
        .arg(&a)
        .arg("-b")
        .arg(&b)
        .args(["--key", "folio", "--output-dir"])
        .arg(workspace.path())
        .assert()
        .failure()
        .stderr(contains("error: Comparing"))
        .stderr(contains("Column 'folio' not found"));
}

#[test]
fn conflicting_key_options_are_rejected() {
    reconcile()
        .args([
            "compare",
            "-a",
            "a.csv",
            "-b",
            "b.csv",
            "--key",
            "id",
            "--key-columns",
            "a,b",
        ])
        .assert()
        .failure()
        .stderr(contains("cannot be used with"));
}

#[test]
fn identical_sources_report_nothing_to_write() {
    let workspace = TestWorkspace::new();
    let a = workspace.write("a.csv", "id,v\n1,x\n");
    let b = workspace.write("b.csv", "id,v\n1,x\n");

    reconcile()
        .args(["compare", "-a"])
        .arg(&a)
        .arg("-b")
        .arg(&b)
        .arg("--output-dir")
        .arg(workspace.path())
        .assert()
        .failure()
        .stderr(contains("no rows to report"));
    assert!(!workspace.path().join("REPORT_FULL_COMPARISON.xlsx").exists());
}

#[test]
fn compare_many_fails_when_any_pair_fails() {
    let workspace = TestWorkspace::new();
    let base = workspace.write("base.csv", "id,v\n1,x\n2,y\n");
    let good = workspace.write("good.csv", "id,v\n2,y\n");
    let bad = workspace.write("bad.json", "{}");

    reconcile()
        .args(["compare-many", "-i"])
        .arg(&base)
        .arg("-i")
        .arg(&good)
        .arg("-i")
        .arg(&bad)
        .args(["--analysis", "missing", "--output-dir"])
        .arg(workspace.path())
        .assert()
        .failure()
        .stderr(contains("1 of 2 comparison(s) failed"));
    assert!(workspace.path().join("REPORT_MISSING_good.xlsx").exists());
}

#[test]
fn inspect_logs_columns_and_key() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "patients.csv",
        "Listado,,\nRUT,Nombre,Comuna\n111,Ana,Macul\n222,Luis,\n",
    );

    reconcile()
        .args(["inspect", "-i"])
        .arg(&input)
        .assert()
        .success()
        .stderr(contains("Header at row 2"))
        .stderr(contains("Nombre"))
        .stderr(contains("Key: RUT"));
}

#[test]
fn config_command_writes_loadable_defaults() {
    let workspace = TestWorkspace::new();
    let path = workspace.path().join("reconcile.yaml");

    reconcile()
        .args(["config", "--output"])
        .arg(&path)
        .assert()
        .success();

    let loaded = ReconcileConfig::load(&path).expect("load written config");
    assert_eq!(loaded, ReconcileConfig::default());
}

#[test]
fn partial_config_overrides_only_named_fields() {
    let workspace = TestWorkspace::new();
    let config = workspace.write("cfg.yaml", "report:\n  null_placeholder: N/A\n");
    let a = workspace.write("a.csv", "id,name\n1,\n");
    let b = workspace.write("b.csv", "id,name\n2,Eva\n");
    let output = workspace.path().join("out.xlsx");

    reconcile()
        .args(["compare", "-a"])
        .arg(&a)
        .arg("-b")
        .arg(&b)
        .args(["--analysis", "incomplete", "--config"])
        .arg(&config)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();
    assert!(output.exists());

    let loaded = ReconcileConfig::load(&config).expect("load partial config");
    assert_eq!(loaded.report.null_placeholder, "N/A");
    assert_eq!(loaded.keys, ReconcileConfig::default().keys);
}
