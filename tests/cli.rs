//! Binary smoke tests.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn repogate() -> Command {
    let mut cmd = Command::cargo_bin("repogate").unwrap();
    cmd.env_remove("REPOGATE_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn version_flag() {
    repogate()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn help_lists_commands() {
    repogate()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn serve_help_mentions_no_lock() {
    repogate()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--no-lock"));
}

#[test]
fn config_show_reads_explicit_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "listen = \"127.0.0.1:9911\"\n\n[store]\nno_lock = true\n",
    )
    .unwrap();

    repogate()
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("loaded from"))
        .stdout(predicate::str::contains("127.0.0.1:9911"))
        .stdout(predicate::str::contains("no_lock = true"));
}

#[test]
fn config_show_rejects_unknown_keys() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "bogus = 1\n").unwrap();

    repogate()
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn missing_explicit_config_fails() {
    repogate()
        .args(["--config", "/definitely/not/here.toml", "config", "show"])
        .assert()
        .failure();
}

#[test]
fn config_init_writes_then_refuses_overwrite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("repogate.toml");

    repogate()
        .args(["config", "init", "--path"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote"));
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("[store]"));

    repogate()
        .args(["config", "init", "--path"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    repogate()
        .args(["config", "init", "--force", "--path"])
        .arg(&path)
        .assert()
        .success();
}

#[test]
fn serve_fails_fast_on_bad_root() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("not-a-dir");
    std::fs::write(&file, "").unwrap();

    repogate()
        .args(["serve", "--listen", "127.0.0.1:0", "--root-dir"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to prepare store root"));
}
