use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const SINGLE_BODY: &str = r#"{
  "kind": "block",
  "operations": [
    {
      "kind": "expression_statement",
      "syntax": "f();",
      "operation": { "kind": "invocation", "method": "f", "syntax": "f()" }
    }
  ]
}"#;

const NAMED_BODIES: &str = r#"[
  { "name": "first", "body": { "kind": "block", "operations": [] } },
  {
    "name": "second",
    "body": {
      "kind": "try",
      "body": { "kind": "block" },
      "catches": [ { "handler": { "kind": "block" } } ]
    }
  }
]"#;

const RETHROW: &str = r#"{ "kind": "throw", "syntax": "throw;" }"#;

fn write_input(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_build_text() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "body.json", SINGLE_BODY);

    Command::cargo_bin("opflow")
        .unwrap()
        .arg("build")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Block[B0] - Entry"))
        .stdout(predicate::str::contains("f();"))
        .stdout(predicate::str::contains("Block[B2] - Exit"));
}

#[test]
fn test_build_selects_function_as_json() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "bodies.json", NAMED_BODIES);

    let output = Command::cargo_bin("opflow")
        .unwrap()
        .args(["build", "--format", "json", "--function", "second"])
        .arg(&input)
        .output()
        .unwrap();
    assert!(output.status.success());

    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["name"], "second");
    assert_eq!(reports[0]["graph"]["blocks"].as_array().unwrap().len(), 4);
    assert_eq!(reports[0]["graph"]["regions"][1]["kind"], "TryAndCatch");
}

#[test]
fn test_build_unknown_function_fails() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "bodies.json", NAMED_BODIES);

    Command::cargo_bin("opflow")
        .unwrap()
        .args(["build", "--function", "third"])
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No body named `third`"));
}

#[test]
fn test_build_dot_to_file() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "bodies.json", NAMED_BODIES);
    let output = dir.path().join("graph.dot");

    Command::cargo_bin("opflow")
        .unwrap()
        .args(["build", "--format", "dot", "--output"])
        .arg(&output)
        .arg(&input)
        .assert()
        .success();

    let dot = fs::read_to_string(&output).unwrap();
    assert!(dot.contains("// first"));
    assert!(dot.contains("// second"));
    assert_eq!(dot.matches("digraph CFG {").count(), 2);
}

#[test]
fn test_check_reports_errors() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "rethrow.json", RETHROW);

    Command::cargo_bin("opflow")
        .unwrap()
        .arg("check")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("only allowed inside a catch clause"));
}

#[test]
fn test_check_clean_input() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "body.json", SINGLE_BODY);

    Command::cargo_bin("opflow")
        .unwrap()
        .arg("check")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Checked 1 bodies: 0 errors"));
}

#[test]
fn test_malformed_input_fails() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "broken.json", r#"{ "kind": "no_such_kind" }"#);

    Command::cargo_bin("opflow")
        .unwrap()
        .arg("build")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Malformed operation tree"));
}

#[test]
fn test_no_unreachable_warnings_flag() {
    let dir = TempDir::new().unwrap();
    let input = write_input(
        &dir,
        "dead.json",
        r#"{
          "kind": "block",
          "operations": [
            { "kind": "return", "syntax": "return;" },
            { "kind": "expression_statement", "syntax": "g();",
              "operation": { "kind": "invocation", "method": "g", "syntax": "g()" } }
          ]
        }"#,
    );

    Command::cargo_bin("opflow")
        .unwrap()
        .arg("build")
        .arg(&input)
        .assert()
        .success()
        .stderr(predicate::str::contains("Unreachable code detected: `g();`"));

    Command::cargo_bin("opflow")
        .unwrap()
        .args(["build", "--no-unreachable-warnings"])
        .arg(&input)
        .assert()
        .success()
        .stderr(predicate::str::contains("Unreachable").not());
}
