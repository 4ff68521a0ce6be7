use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn help_lists_the_top_level_subcommands() {
    Command::cargo_bin("tyger")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("buffer"))
        .stdout(contains("codespec"))
        .stdout(contains("run"));
}

#[test]
fn completions_emits_a_bash_script() {
    Command::cargo_bin("tyger")
        .unwrap()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(contains("complete"));
}

#[test]
fn buffer_get_without_a_server_url_fails_with_a_helpful_message() {
    Command::cargo_bin("tyger")
        .unwrap()
        .env_remove("TYGER_SERVER_URL")
        .env("HOME", std::env::temp_dir())
        .args(["buffer", "get", "abc"])
        .assert()
        .failure()
        .stderr(contains("server URL"));
}

#[test]
fn run_create_rejects_a_missing_spec_file() {
    Command::cargo_bin("tyger")
        .unwrap()
        .env("TYGER_SERVER_URL", "http://localhost:1")
        .args(["run", "create", "/nonexistent/run-spec.json"])
        .assert()
        .failure();
}
