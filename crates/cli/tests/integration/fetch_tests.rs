use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn fetch_stages_without_building() {
  let env = TestEnv::new();

  env
    .pinbuild()
    .arg("fetch")
    .assert()
    .success()
    .stdout(predicate::str::contains("Staged source 1.0.0"));

  assert!(env.path("mpack-src/setup.py").exists());
  assert!(env.path("mpack-src/src/mpack.c").exists());
  assert!(!env.path("mpack-src/libmpack-1.0.0").exists());
  assert_eq!(env.count("build.log"), 0);
  assert_eq!(env.state(), "staged");
}

#[test]
fn second_fetch_is_a_no_op() {
  let env = TestEnv::new();
  env.pinbuild().arg("fetch").assert().success();

  // Removing the archive proves nothing is downloaded again.
  std::fs::remove_file(env.archives.join("libmpack-1.0.0.tar.gz")).unwrap();

  env
    .pinbuild()
    .arg("fetch")
    .assert()
    .success()
    .stdout(predicate::str::contains("already staged"));
}

#[test]
fn missing_archive_is_a_fetch_failure() {
  let env = TestEnv::new();
  std::fs::remove_file(env.archives.join("libmpack-1.0.0.tar.gz")).unwrap();

  env
    .pinbuild()
    .arg("fetch")
    .assert()
    .failure()
    .stderr(predicate::str::contains("fetch stage failed"));

  assert!(!env.path("mpack-src").exists());
  assert_eq!(env.state(), "empty");
}

#[test]
fn corrupt_archive_is_an_extract_failure() {
  let env = TestEnv::new();
  std::fs::write(env.archives.join("libmpack-1.0.0.tar.gz"), "<html>moved</html>").unwrap();

  env
    .pinbuild()
    .arg("fetch")
    .assert()
    .failure()
    .stderr(predicate::str::contains("extract stage failed"));

  assert!(!env.path("mpack-src").exists());
}

#[test]
fn sha256_mismatch_is_rejected() {
  let env = TestEnv::new();
  let config = std::fs::read_to_string(env.path("pinbuild.toml")).unwrap();
  env.write_config_raw(&format!("sha256 = \"{}\"\n{config}", "0".repeat(64)));

  env
    .pinbuild()
    .arg("fetch")
    .assert()
    .failure()
    .stderr(predicate::str::contains("sha256 mismatch"));

  assert!(!env.path("mpack-src").exists());
}

#[test]
fn fetch_json_output() {
  let env = TestEnv::new();

  let output = env.pinbuild().args(["fetch", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["fetched"], true);
  assert_eq!(json["version"], "1.0.0");
  assert_eq!(json["sha256"].as_str().unwrap().len(), 64);
}

#[test]
fn external_extract_command() {
  let env = TestEnv::new();
  let config = std::fs::read_to_string(env.path("pinbuild.toml")).unwrap();
  env.write_config_raw(&format!(
    "extract_command = \"tar xzf - --strip-components={{strip}} -C {{dest}}\"\n{config}"
  ));

  env.pinbuild().arg("fetch").assert().success();

  assert!(env.path("mpack-src/src/mpack.c").exists());
  assert_eq!(env.state(), "staged");
}
