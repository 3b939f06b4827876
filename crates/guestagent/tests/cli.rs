//! Command line smoke tests.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_options() {
    Command::cargo_bin("guestagent")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--api-endpoint"))
        .stdout(predicate::str::contains("--admin-install"));
}

#[test]
fn non_admin_without_forwarder_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "admin-install = false\n").unwrap();

    Command::cargo_bin("guestagent")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .env_remove("GUESTAGENT_FORWARDER_ADDRESS")
        .env_remove("GUESTAGENT_ADMIN_INSTALL")
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("forwarder-address"));
}

#[test]
fn empty_feed_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        "admin-install = true\napi-endpoint = \"http://127.0.0.1:9\"\n",
    )
    .unwrap();

    Command::cargo_bin("guestagent")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .write_stdin("")
        .assert()
        .success();
}
