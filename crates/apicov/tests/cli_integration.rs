//! Integration tests that run the apicov binary

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn apicov_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_apicov"))
}

fn fixtures_dir() -> &'static Path {
    Path::new(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../apicov-core/tests/fixtures"
    ))
}

fn users_spec() -> PathBuf {
    fixtures_dir().join("users.yaml")
}

fn run(args: &[&str], hits_dir: &Path) -> Output {
    apicov_bin()
        .args(args)
        .arg("--spec")
        .arg(users_spec())
        .arg("--hits-dir")
        .arg(hits_dir)
        .env("APICOV_LOG", "warn")
        .output()
        .expect("Failed to run apicov")
}

fn write_observations(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, lines.join("\n")).expect("Failed to write observations");
    path
}

#[test]
fn test_endpoints_command_lists_declared_keys() {
    let temp = tempfile::tempdir().unwrap();
    let output = run(&["endpoints"], temp.path());
    assert!(output.status.success(), "Command should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let keys: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        keys,
        vec![
            "GET /users",
            "POST /users",
            "GET /users/{id}",
            "PUT /users/{id}",
            "DELETE /users/{id}"
        ]
    );
}

#[test]
fn test_normalize_command() {
    let temp = tempfile::tempdir().unwrap();
    let output = run(
        &["normalize", "get", "/users/42", "http://localhost:8080/users?page=2", "/nope/1"],
        temp.path(),
    );
    assert!(output.status.success(), "Command should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("GET /users/42 -> GET /users/{id}"), "{}", stdout);
    assert!(
        stdout.contains("GET http://localhost:8080/users?page=2 -> GET /users"),
        "{}",
        stdout
    );
    assert!(stdout.contains("GET /nope/1 -> GET /nope/1"), "{}", stdout);
}

#[test]
fn test_ingest_then_report() {
    let temp = tempfile::tempdir().unwrap();
    let hits = temp.path().join("hits");

    let obs = write_observations(
        temp.path(),
        "gw0.jsonl",
        &[
            r#"{"method":"GET","url":"http://localhost:8080/users","status":200}"#,
            r#"{"method":"GET","url":"/users/1","status":200}"#,
        ],
    );
    let output = run(&["ingest", obs.to_str().unwrap(), "--worker", "gw0"], &hits);
    assert!(output.status.success(), "ingest should succeed: {:?}", output);
    assert!(hits.join("hits-gw0.json").exists());

    let obs = write_observations(
        temp.path(),
        "gw1.jsonl",
        &[
            r#"{"method":"GET","url":"/users/2","status":503}"#,
            r#"{"method":"POST","url":"/users","error":"socket hang up","status":500}"#,
        ],
    );
    let output = run(&["ingest", obs.to_str().unwrap(), "--worker", "gw1"], &hits);
    assert!(output.status.success(), "ingest should succeed: {:?}", output);

    let report_path = temp.path().join("out").join("api-coverage.json");
    let output = run(
        &["report", "-f", "json", "-o", report_path.to_str().unwrap()],
        &hits,
    );
    assert!(output.status.success(), "report should succeed: {:?}", output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let report: serde_json::Value = serde_json::from_str(&stdout).expect("stdout should be JSON");
    assert_eq!(report["summary"]["totalEndpoints"], 5);
    assert_eq!(report["summary"]["testedEndpoints"], 3);
    assert_eq!(report["summary"]["coveragePercentage"], 60.0);
    assert_eq!(report["serverErrorStats"]["totalServerErrors"], 2);
    assert_eq!(report["serverErrorStats"]["statusCodeCounts"]["503"], 1);
    assert_eq!(report["serverErrorStats"]["statusCodeCounts"]["500"], 1);
    assert_eq!(
        report["serverErrors"]["POST /users"]["lastErrorMessage"],
        "socket hang up"
    );

    let written = std::fs::read_to_string(&report_path).expect("report file should exist");
    let written: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(written["summary"], report["summary"]);
}

#[test]
fn test_report_check_fails_below_threshold() {
    let temp = tempfile::tempdir().unwrap();
    let hits = temp.path().join("hits");
    let obs = write_observations(
        temp.path(),
        "obs.jsonl",
        &[r#"{"method":"GET","url":"/users"}"#],
    );
    assert!(run(&["ingest", obs.to_str().unwrap()], &hits).status.success());

    let report_path = temp.path().join("report.json");
    let report = report_path.to_str().unwrap();

    let output = run(&["report", "-o", report, "--check", "--threshold", "50"], &hits);
    assert_eq!(output.status.code(), Some(1), "20% should fail a 50% threshold");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("below threshold"), "{}", stderr);

    let output = run(&["report", "-o", report, "--check", "--threshold", "20"], &hits);
    assert!(output.status.success(), "20% should pass a 20% threshold");
}

#[test]
fn test_report_rejects_unknown_format() {
    let temp = tempfile::tempdir().unwrap();
    let output = run(&["report", "-f", "html"], temp.path());
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown output format"), "{}", stderr);
}

#[test]
fn test_clean_removes_worker_files() {
    let temp = tempfile::tempdir().unwrap();
    let hits = temp.path().join("hits");
    let obs = write_observations(
        temp.path(),
        "obs.jsonl",
        &[r#"{"method":"GET","url":"/users"}"#],
    );
    assert!(run(&["ingest", obs.to_str().unwrap(), "--worker", "w"], &hits).status.success());
    assert!(hits.join("hits-w.json").exists());

    let output = run(&["clean"], &hits);
    assert!(output.status.success());
    assert!(!hits.join("hits-w.json").exists());
}

#[test]
fn test_missing_explicit_config_fails() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("missing.yaml");
    let output = run(&["endpoints", "-c", missing.to_str().unwrap()], temp.path());
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Config file not found"), "{}", stderr);
}

#[test]
fn test_config_file_supplies_custom_patterns() {
    let temp = tempfile::tempdir().unwrap();
    let config = temp.path().join("config.yaml");
    std::fs::write(
        &config,
        "customPatterns:\n  - pattern: '^/legacy/people/[0-9]+$'\n    template: /users/{id}\n",
    )
    .unwrap();

    let output = run(
        &["normalize", "GET", "/legacy/people/7", "-c", config.to_str().unwrap()],
        temp.path(),
    );
    assert!(output.status.success(), "{:?}", output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("GET /legacy/people/7 -> GET /users/{id}"), "{}", stdout);
}
