use predicates::prelude::*;

use super::common::{BUILD_CMD, CLEAN_CMD, TestEnv};

const FAILING_PYTEST: &str = "echo test >> test.log; \
  echo 'FAILED tests/test_mpack.py::test_roundtrip - AssertionError: 1 != 2'; \
  echo 'FAILED tests/test_mpack.py::test_unpack_ext - ValueError: bad ext'; \
  exit 1";

#[test]
fn test_from_empty_runs_whole_chain() {
  let env = TestEnv::new();

  env
    .pinbuild()
    .arg("test")
    .assert()
    .success()
    .stdout(predicate::str::contains("All tests passed"));

  assert_eq!(env.count("build.log"), 1);
  assert_eq!(env.count("test.log"), 1);
  assert_eq!(env.state(), "tested");
  assert!(env.status()["last_passed_unix"].is_u64());
}

#[test]
fn tests_rerun_without_rebuilding() {
  let env = TestEnv::new();
  env.pinbuild().arg("build").assert().success();

  env.pinbuild().arg("test").assert().success();
  env.pinbuild().arg("test").assert().success();

  assert_eq!(env.count("build.log"), 1);
  assert_eq!(env.count("test.log"), 2);
}

#[test]
fn failing_tests_are_listed_by_name() {
  let env = TestEnv::with_commands(BUILD_CMD, FAILING_PYTEST, CLEAN_CMD);

  env
    .pinbuild()
    .arg("test")
    .assert()
    .failure()
    .stderr(predicate::str::contains("test_roundtrip"))
    .stderr(predicate::str::contains("AssertionError: 1 != 2"))
    .stderr(predicate::str::contains("test_unpack_ext"))
    .stderr(predicate::str::contains("2 test(s) failed"));

  assert_eq!(env.state(), "built");
}

#[test]
fn failing_tests_json_report() {
  let env = TestEnv::with_commands(BUILD_CMD, FAILING_PYTEST, CLEAN_CMD);

  let output = env.pinbuild().args(["test", "-o", "json"]).output().unwrap();
  assert!(!output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["report"]["status"], "failed");
  let failures = json["report"]["failures"].as_array().unwrap();
  assert_eq!(failures.len(), 2);
  assert_eq!(failures[0]["name"], "test_roundtrip");
}

#[test]
fn unparseable_failure_falls_back_to_output() {
  let env = TestEnv::with_commands(BUILD_CMD, "echo 'Segmentation fault (core dumped)'; exit 139", CLEAN_CMD);

  env
    .pinbuild()
    .arg("test")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Segmentation fault"))
    .stderr(predicate::str::contains("1 test(s) failed"));
}

#[test]
fn no_build_without_artifacts_is_a_prerequisite_error() {
  let env = TestEnv::new();

  env
    .pinbuild()
    .args(["test", "--no-build"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("pinbuild build"));

  assert_eq!(env.count("test.log"), 0);
  assert!(!env.path("mpack-src").exists());
}

#[test]
fn no_build_after_build_runs_tests() {
  let env = TestEnv::new();
  env.pinbuild().arg("build").assert().success();

  env.pinbuild().args(["test", "--no-build"]).assert().success();

  assert_eq!(env.count("test.log"), 1);
}
