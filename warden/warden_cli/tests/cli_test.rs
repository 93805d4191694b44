use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const MANIFEST: &str = r##"
[[tenant]]
name = "alpha"
template = "<main>alpha</main>"

[tenant.on_mount]
globals = { count = 5, theme = "dark" }
intervals = [100]
listeners = ["resize"]

[[tenant]]
name = "beta"
container = "#side"

[tenant.on_mount]
globals = { label = "beta" }
"##;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("Failed to write test file");
    path
}

fn warden() -> Command {
    Command::cargo_bin("warden").unwrap()
}

#[test]
fn test_simulate_proxy_host_is_clean() {
    let dir = TempDir::new().unwrap();
    let manifest = write(&dir, "tenants.toml", MANIFEST);

    warden()
        .arg("simulate")
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"sandbox\": \"Proxy\""))
        .stdout(predicate::str::contains("\"leaked\": []"));
}

#[test]
fn test_simulate_snapshot_host_restores_globals() {
    let dir = TempDir::new().unwrap();
    let manifest = write(
        &dir,
        "tenants.toml",
        &format!("[host]\ninterception = false\n{MANIFEST}"),
    );

    warden()
        .arg("simulate")
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"sandbox\": \"Snapshot\""))
        .stdout(predicate::str::contains("\"leaked\": []"));
}

#[test]
fn test_simulate_without_sandbox_reports_leak() {
    let dir = TempDir::new().unwrap();
    let manifest = write(&dir, "tenants.toml", MANIFEST);
    let config = write(&dir, "warden.toml", "sandbox = false\n");

    warden()
        .arg("simulate")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"count\""))
        .stderr(predicate::str::contains("leaked state onto the host: alpha, beta"));
}

#[test]
fn test_simulate_missing_manifest() {
    warden()
        .args(["simulate", "--manifest", "/nonexistent/tenants.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Manifest not found"));
}

#[test]
fn test_check_config_prints_effective_config() {
    let dir = TempDir::new().unwrap();
    let config = write(&dir, "warden.toml", "singular = true\n");

    warden()
        .arg("check-config")
        .arg("--config")
        .arg(&config)
        .arg("--no-interception")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": true"))
        .stdout(predicate::str::contains("\"loose\": true"));
}

#[test]
fn test_check_config_rejects_conflicting_style_isolation() {
    let dir = TempDir::new().unwrap();
    let config = write(
        &dir,
        "warden.toml",
        "[sandbox]\nstrict_style_isolation = true\nexperimental_style_isolation = true\n",
    );

    warden()
        .arg("check-config")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("can not be used with"));
}

#[test]
fn test_check_config_missing_file() {
    warden()
        .args(["check-config", "--config", "/nonexistent/warden.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn test_unknown_log_level_is_rejected() {
    warden()
        .args(["--log-level", "loud", "check-config", "--config", "x.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown log level"));
}
