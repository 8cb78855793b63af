//! Command-line behaviour of reel-post that needs no network

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const SECRET_VARS: &[&str] = &[
    "META_TOKEN",
    "DROPBOX_APP_KEY",
    "DROPBOX_APP_SECRET",
    "DROPBOX_REFRESH_TOKEN",
    "TELEGRAM_BOT_TOKEN",
    "TELEGRAM_CHAT_ID",
];

fn reel_post() -> Command {
    let mut cmd = Command::cargo_bin("reel-post").unwrap();
    cmd.env_remove("REELCAST_CONFIG")
        .env_remove("REELCAST_LOG_FORMAT")
        .env_remove("REELCAST_LOG_LEVEL");
    for var in SECRET_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn write_config(dir: &TempDir, content: &str) -> String {
    let path = dir.path().join("config.toml");
    fs::write(&path, content).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn test_help_describes_exit_codes() {
    reel_post()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("reel-post"))
        .stdout(predicate::str::contains("EXIT CODES"))
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn test_missing_config_file() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    reel_post()
        .arg("--config")
        .arg(&missing)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn test_config_path_from_env() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("from-env.toml");

    reel_post()
        .env("REELCAST_CONFIG", &missing)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn test_unparseable_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[account\nkey = ");

    reel_post()
        .args(["--config", &path])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to parse config"));
}

#[test]
fn test_invalid_config_value() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[account]
key = "eclipsed_by_you"

[instagram]
account_id = "1784"

[facebook]
page_id = "1000"

[timing]
verify_attempts = 0
"#,
    );

    reel_post()
        .args(["--config", &path])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("timing.verify_attempts"));
}

#[test]
fn test_missing_secrets() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[account]
key = "eclipsed_by_you"

[instagram]
account_id = "1784"

[facebook]
page_id = "1000"
"#,
    );

    reel_post()
        .args(["--config", &path])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("META_TOKEN"));
}

#[test]
fn test_invalid_deadline_is_usage_error() {
    reel_post()
        .args(["--deadline", "whenever"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--deadline"));
}

#[test]
fn test_invalid_log_format_is_usage_error() {
    reel_post()
        .args(["--log-format", "xml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid log format"));
}
