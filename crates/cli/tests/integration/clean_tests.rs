use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn clean_removes_artifacts_markers_and_sources() {
  let env = TestEnv::new();
  env.pinbuild().arg("test").assert().success();

  env
    .pinbuild()
    .arg("clean")
    .assert()
    .success()
    .stdout(predicate::str::contains("Clean complete"));

  assert_eq!(env.count("clean.log"), 1);
  assert!(!env.path("_mpack.so").exists());
  assert!(!env.path("mpack-src").exists());
  assert!(!env.path(".pinbuild-build.json").exists());
  assert!(!env.path(".pinbuild-test.json").exists());
  assert_eq!(env.state(), "empty");
}

#[test]
fn clean_twice_is_a_no_op() {
  let env = TestEnv::new();
  env.pinbuild().arg("build").assert().success();
  env.pinbuild().arg("clean").assert().success();

  env
    .pinbuild()
    .arg("clean")
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to clean"));

  assert_eq!(env.count("clean.log"), 1);
}

#[test]
fn clean_on_fresh_project_does_nothing() {
  let env = TestEnv::new();

  env
    .pinbuild()
    .arg("clean")
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to clean"));

  assert_eq!(env.count("clean.log"), 0);
}

#[test]
fn clean_after_fetch_skips_toolchain() {
  let env = TestEnv::new();
  env.pinbuild().arg("fetch").assert().success();

  env.pinbuild().arg("clean").assert().success();

  assert_eq!(env.count("clean.log"), 0);
  assert!(!env.path("mpack-src").exists());
}

#[test]
fn clean_removes_interrupted_extractions() {
  let env = TestEnv::new();
  std::fs::create_dir_all(env.path(".pinbuild-partial-mpack-srcQ1w2E3/src")).unwrap();

  env.pinbuild().arg("clean").assert().success();

  assert!(!env.path(".pinbuild-partial-mpack-srcQ1w2E3").exists());
}

#[test]
fn failing_toolchain_clean_is_reported() {
  let env = TestEnv::new();
  env.pinbuild().arg("build").assert().success();
  env.write_config("1.0.0", super::common::BUILD_CMD, super::common::TEST_CMD, "exit 3");

  env
    .pinbuild()
    .arg("clean")
    .assert()
    .failure()
    .stderr(predicate::str::contains("clean stage failed"));
}

#[test]
fn build_after_clean_fetches_again() {
  let env = TestEnv::new();
  env.pinbuild().arg("build").assert().success();
  env.pinbuild().arg("clean").assert().success();

  env
    .pinbuild()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Fetched"));

  assert_eq!(env.count("build.log"), 2);
}
