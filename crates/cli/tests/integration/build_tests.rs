use predicates::prelude::*;

use super::common::{BUILD_CMD, CLEAN_CMD, TEST_CMD, TestEnv};

#[test]
fn build_from_empty_fetches_and_compiles() {
  let env = TestEnv::new();

  env
    .pinbuild()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Built against source 1.0.0"))
    .stdout(predicate::str::contains("_mpack.so"));

  assert_eq!(
    std::fs::read_to_string(env.path("_mpack.so")).unwrap(),
    "/* mpack 1.0.0 */\n"
  );
  assert_eq!(env.count("build.log"), 1);
  assert_eq!(env.state(), "built");
}

#[test]
fn second_build_is_up_to_date() {
  let env = TestEnv::new();
  env.pinbuild().arg("build").assert().success();

  env
    .pinbuild()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("up to date"));

  assert_eq!(env.count("build.log"), 1);
}

#[test]
fn forced_build_recompiles() {
  let env = TestEnv::new();
  env.pinbuild().arg("build").assert().success();

  env.pinbuild().args(["build", "--force"]).assert().success();

  assert_eq!(env.count("build.log"), 2);
}

#[test]
fn deleted_artifact_is_rebuilt() {
  let env = TestEnv::new();
  env.pinbuild().arg("build").assert().success();
  std::fs::remove_file(env.path("_mpack.so")).unwrap();

  assert_eq!(env.state(), "staged");
  env.pinbuild().arg("build").assert().success();

  assert!(env.path("_mpack.so").exists());
  assert_eq!(env.count("build.log"), 2);
}

#[test]
fn compile_error_is_reported_and_state_stays_staged() {
  let env = TestEnv::with_commands(
    "echo 'src/mpack.c:3:1: error: unknown type name' >&2; exit 1",
    TEST_CMD,
    CLEAN_CMD,
  );

  env
    .pinbuild()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("build stage failed"))
    .stderr(predicate::str::contains("unknown type name"));

  assert_eq!(env.state(), "staged");
}

#[test]
fn build_without_artifact_fails() {
  let env = TestEnv::with_commands("true", TEST_CMD, CLEAN_CMD);

  env
    .pinbuild()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("no artifact"));
}

#[test]
fn version_bump_restages_and_rebuilds() {
  let env = TestEnv::new();
  env.pinbuild().arg("build").assert().success();

  env.write_archive("1.0.1");
  env.write_config("1.0.1", BUILD_CMD, TEST_CMD, CLEAN_CMD);
  assert_eq!(env.state(), "empty");

  env
    .pinbuild()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Built against source 1.0.1"));

  assert_eq!(
    std::fs::read_to_string(env.path("_mpack.so")).unwrap(),
    "/* mpack 1.0.1 */\n"
  );
  assert_eq!(env.count("build.log"), 2);
  assert_eq!(env.status()["pin"]["version"], "1.0.1");
}

#[test]
fn env_override_selects_build_command() {
  let env = TestEnv::new();

  env
    .pinbuild()
    .arg("build")
    .env("PINBUILD_BUILD_CMD", "echo env >> build.log; touch _override.so")
    .assert()
    .success();

  assert!(env.path("_override.so").exists());
  assert!(!env.path("_mpack.so").exists());
}

#[test]
fn build_json_output() {
  let env = TestEnv::new();

  let output = env.pinbuild().args(["build", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["compiled"], true);
  assert_eq!(json["fetched"], true);
  assert_eq!(json["artifacts"].as_array().unwrap().len(), 1);
}
