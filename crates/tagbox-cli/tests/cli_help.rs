use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_lists_commands() {
    cargo_bin_cmd!("tagbox")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("bot"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("webhook"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_webhook_help_shows_subcommands() {
    cargo_bin_cmd!("tagbox")
        .args(["webhook", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("set"))
        .stdout(predicate::str::contains("delete"));
}

#[test]
fn test_webhook_set_rejects_invalid_url() {
    cargo_bin_cmd!("tagbox")
        .args(["webhook", "set", "not a url"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_missing_subcommand_fails() {
    cargo_bin_cmd!("tagbox").assert().failure();
}
