//! CLI integration tests

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn wix_managed(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("wix-managed").unwrap();
    cmd.current_dir(dir).arg("--no-color");
    cmd
}

const BLOB: &str = r#"{"version":1,"properties":{"INSTALLDIR":"C:\\App","WIX_MANAGED_RUNTIME_DATA":"AppName=My App"}}"#;

#[test]
fn test_encode_escapes_values() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args(["encode", "AppName=My App", "Conn=a=b;c"])
        .assert()
        .success()
        .stdout(predicate::str::contains("AppName=My App"))
        .stdout(predicate::str::contains("Conn=a{$EQV}b{$SMCOL}c"));
}

#[test]
fn test_encode_rejects_bad_pair() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args(["encode", "novalue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[test]
fn test_decode() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args(["decode", "AppName=My App"])
        .assert()
        .success()
        .stdout(predicate::str::contains("AppName = My App"));
}

#[test]
fn test_decode_stdin_json() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args(["--format", "json", "decode"])
        .write_stdin("Path=C:\\App\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"Path\": \"C:\\\\App\""));
}

#[test]
fn test_decode_malformed() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args(["decode", "broken"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    wix_managed(dir.path())
        .args(["decode", "--strict", "broken"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Malformed data bag"));
}

#[test]
fn test_capture() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args([
            "capture",
            "-p",
            "INSTALLDIR=C:\\App",
            "-p",
            "SECRET=hidden",
            "-d",
            "AppName=My App",
            "--uses",
            "INSTALLDIR",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"version\":1"))
        .stdout(predicate::str::contains("INSTALLDIR"))
        .stdout(predicate::str::contains("AppName=My App"))
        .stdout(predicate::str::contains("SECRET").not());
}

#[test]
fn test_capture_uses_config_properties() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("custom.yaml");
    std::fs::write(&config, "deferred_properties: [CUSTOM_PROP]\n").unwrap();

    wix_managed(dir.path())
        .args(["--config", config.to_str().unwrap()])
        .args(["capture", "-p", "CUSTOM_PROP=yes", "-p", "INSTALLDIR=C:\\App"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"CUSTOM_PROP\":\"yes\""))
        .stdout(predicate::str::contains("INSTALLDIR").not());
}

#[test]
fn test_bad_config_file() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("custom.toml");
    std::fs::write(&config, "x = 1\n").unwrap();

    wix_managed(dir.path())
        .args(["--config", config.to_str().unwrap(), "capture"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_rehydrate() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args(["rehydrate", BLOB])
        .assert()
        .success()
        .stdout(predicate::str::contains("INSTALLDIR = C:\\App"))
        .stdout(predicate::str::contains("AppName = My App"));
}

#[test]
fn test_rehydrate_malformed() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args(["rehydrate", "not json"])
        .assert()
        .success();

    wix_managed(dir.path())
        .args(["rehydrate", "--strict", "not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Malformed CustomActionData"));
}

#[test]
fn test_dialogs_install() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args(["dialogs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0. welcome"))
        .stdout(predicate::str::contains("6. exit"));
}

#[test]
fn test_dialogs_modify_json() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args(["--format", "json", "dialogs", "--mode", "modify"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"maintenance-type\""));
}

#[test]
fn test_dialogs_uninstall_has_no_ui() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args(["dialogs", "--mode", "uninstall"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no managed UI"));
}

#[test]
fn test_dialogs_unknown_mode() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args(["dialogs", "--mode", "sideways"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown install mode"));
}

#[test]
fn test_init_and_simulate() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args(["init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created scenario.yaml"));
    assert!(dir.path().join("scenario.yaml").exists());

    wix_managed(dir.path())
        .args(["simulate", "scenario.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Install flow succeeded"))
        .stdout(predicate::str::contains("data.AppName = My App"));
}

#[test]
fn test_init_refuses_overwrite() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("scenario.yaml"), "keep me").unwrap();

    wix_managed(dir.path())
        .args(["init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    wix_managed(dir.path())
        .args(["init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_init_config_loads() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args(["init", "config"])
        .assert()
        .success();

    let path = dir.path().join(".wixmanaged.yaml");
    assert!(path.exists());
    assert!(wix_managed::RuntimeConfig::load(&path).is_ok());
}

#[test]
fn test_simulate_json() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path()).args(["init"]).assert().success();

    wix_managed(dir.path())
        .args(["--format", "json", "simulate", "scenario.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\": true"))
        .stdout(predicate::str::contains("\"outcome\": \"completed\""));
}

#[test]
fn test_simulate_aborted_install_exits_one() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fail.yaml");
    std::fs::write(
        &path,
        r#"
name: Failing handler
handlers:
  - event: before-install
    fail: disk full
navigation: [next, next, next, next, next, next, next]
"#,
    )
    .unwrap();

    wix_managed(dir.path())
        .args(["simulate", "fail.yaml"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Install flow aborted"));
}

#[test]
fn test_simulate_missing_file() {
    let dir = tempdir().unwrap();
    wix_managed(dir.path())
        .args(["simulate", "nope.yaml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to load scenario"));
}
