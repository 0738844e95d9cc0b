//! CLI integration tests for tabkeep
//!
//! Tests the tabkeep CLI commands end-to-end using assert_cmd.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const PASSWORD: &str = "Str0ng!Pass";

/// A config and data directory private to one test
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        // Pinned so `config list` output does not depend on defaults.
        std::fs::write(
            config_dir.join("config.toml"),
            "[security]\nkdf_iterations = 600000\nsession_timeout_minutes = 15\n",
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Helper to create a command isolated from the user's environment
    #[allow(deprecated)]
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("tabkeep").unwrap();
        cmd.env("TABKEEP_CONFIG_DIR", self.path().join("config"));
        cmd.env("TABKEEP_DATA_DIR", self.path().join("data"));
        cmd.env_remove("TABKEEP_PASSWORD");
        cmd.env_remove("TABKEEP_NEW_PASSWORD");
        cmd.env_remove("TABKEEP_EXPORT_PASSWORD");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    fn enable_protection(&self) {
        self.cmd()
            .env("TABKEEP_NEW_PASSWORD", PASSWORD)
            .args(["protect", "enable"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Password protection enabled"));
    }
}

#[test]
fn test_help_command() {
    Sandbox::new()
        .cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("protect"))
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("import"));
}

#[test]
fn test_version_output() {
    Sandbox::new()
        .cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tabkeep"));
}

#[test]
fn test_status_on_fresh_vault() {
    Sandbox::new()
        .cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Password protection: disabled"))
        .stdout(predicate::str::contains("Secrets stored: no"));
}

#[test]
fn test_status_json() {
    let sandbox = Sandbox::new();
    let output = sandbox
        .cmd()
        .args(["status", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["protectionEnabled"], false);
    assert_eq!(status["hasSecrets"], false);
}

#[test]
fn test_secrets_round_trip_with_device_key() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .args(["secrets", "set", "openai", "sk-test-1234"])
        .assert()
        .success()
        .stdout(predicate::str::contains("***1234"));

    sandbox
        .cmd()
        .args(["secrets", "get", "openai"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sk-test-1234"));

    sandbox
        .cmd()
        .args(["secrets", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("openai"))
        .stdout(predicate::str::contains("sk-test-1234").not());

    // The database never holds the value in cleartext.
    let database = std::fs::read(sandbox.path().join("data").join("tabkeep.db")).unwrap();
    let needle = b"sk-test-1234";
    assert!(!database.windows(needle.len()).any(|w| w == needle));
}

#[test]
fn test_secret_value_from_stdin() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .args(["secrets", "set", "gemini"])
        .write_stdin("AIza-from-stdin\n")
        .assert()
        .success();

    sandbox
        .cmd()
        .args(["secrets", "get", "gemini"])
        .assert()
        .success()
        .stdout(predicate::str::diff("AIza-from-stdin\n"));
}

#[test]
fn test_remove_missing_secret_fails() {
    Sandbox::new()
        .cmd()
        .args(["secrets", "remove", "openai"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No secret named 'openai'"));
}

#[test]
fn test_protected_vault_needs_password() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["secrets", "set", "openai", "sk-protected"])
        .assert()
        .success();
    sandbox.enable_protection();

    sandbox
        .cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Password protection: enabled"))
        .stdout(predicate::str::contains("Session: locked"));

    sandbox
        .cmd()
        .args(["secrets", "get", "openai"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("TABKEEP_PASSWORD"));

    sandbox
        .cmd()
        .env("TABKEEP_PASSWORD", "wrong-password")
        .args(["secrets", "get", "openai"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E101"));

    sandbox
        .cmd()
        .env("TABKEEP_PASSWORD", PASSWORD)
        .args(["secrets", "get", "openai"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sk-protected"));
}

#[test]
fn test_weak_password_rejected() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .env("TABKEEP_NEW_PASSWORD", "short")
        .args(["protect", "enable"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E800"));

    sandbox
        .cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Password protection: disabled"));
}

#[test]
fn test_enable_twice_suggests_change() {
    let sandbox = Sandbox::new();
    sandbox.enable_protection();

    sandbox
        .cmd()
        .env("TABKEEP_NEW_PASSWORD", "An0ther!Pass")
        .args(["protect", "enable"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E103"))
        .stderr(predicate::str::contains("tabkeep protect change"));
}

#[test]
fn test_change_and_disable_protection() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["secrets", "set", "anthropic", "sk-ant-9999"])
        .assert()
        .success();
    sandbox.enable_protection();

    sandbox
        .cmd()
        .env("TABKEEP_PASSWORD", "wrong-password")
        .env("TABKEEP_NEW_PASSWORD", "N3w!Password")
        .args(["protect", "change"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E101"));

    sandbox
        .cmd()
        .env("TABKEEP_PASSWORD", PASSWORD)
        .env("TABKEEP_NEW_PASSWORD", "N3w!Password")
        .args(["protect", "change"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Password changed"));

    sandbox
        .cmd()
        .env("TABKEEP_PASSWORD", "N3w!Password")
        .args(["protect", "disable"])
        .assert()
        .success();

    sandbox
        .cmd()
        .args(["secrets", "get", "anthropic"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sk-ant-9999"));
}

#[test]
fn test_export_api_keys_requires_password() {
    let sandbox = Sandbox::new();
    let backup = sandbox.path().join("backup.json");
    sandbox
        .cmd()
        .args(["secrets", "set", "openai", "sk-x"])
        .assert()
        .success();

    sandbox
        .cmd()
        .args(["export", "--include-api-keys", "-o"])
        .arg(&backup)
        .assert()
        .failure()
        .stderr(predicate::str::contains("E202"))
        .stderr(predicate::str::contains("TABKEEP_EXPORT_PASSWORD"));

    assert!(!backup.exists());
}

#[test]
fn test_export_import_round_trip() {
    let source = Sandbox::new();
    let backup = source.path().join("backup.json");
    source
        .cmd()
        .args(["secrets", "set", "openai", "sk-exported"])
        .assert()
        .success();

    source
        .cmd()
        .env("TABKEEP_EXPORT_PASSWORD", "backup-pass")
        .args(["export", "--include-api-keys", "-o"])
        .arg(&backup)
        .assert()
        .success()
        .stdout(predicate::str::contains("apiKeys"));

    let contents = std::fs::read_to_string(&backup).unwrap();
    assert!(contents.contains("\"hash\""));
    assert!(!contents.contains("sk-exported"));

    let target = Sandbox::new();
    target
        .cmd()
        .arg("import")
        .arg(&backup)
        .assert()
        .failure()
        .stderr(predicate::str::contains("E202"));

    target
        .cmd()
        .env("TABKEEP_EXPORT_PASSWORD", "backup-pass")
        .arg("import")
        .arg(&backup)
        .assert()
        .success()
        .stdout(predicate::str::contains("API keys: 1"));

    target
        .cmd()
        .args(["secrets", "get", "openai"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sk-exported"));
}

#[test]
fn test_import_detects_tampering() {
    let sandbox = Sandbox::new();
    let backup = sandbox.path().join("backup.json");
    sandbox
        .cmd()
        .env("TABKEEP_EXPORT_PASSWORD", "backup-pass")
        .args(["secrets", "set", "openai", "sk-x"])
        .assert()
        .success();
    sandbox
        .cmd()
        .env("TABKEEP_EXPORT_PASSWORD", "backup-pass")
        .args(["export", "--include-api-keys", "-o"])
        .arg(&backup)
        .assert()
        .success();

    let mut bundle: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&backup).unwrap()).unwrap();
    bundle["contents"] = serde_json::json!({ "notes": ["injected"] });
    std::fs::write(&backup, serde_json::to_string(&bundle).unwrap()).unwrap();

    sandbox
        .cmd()
        .env("TABKEEP_EXPORT_PASSWORD", "backup-pass")
        .arg("import")
        .arg(&backup)
        .assert()
        .failure()
        .stderr(predicate::str::contains("E200"));
}

#[test]
fn test_import_rejects_garbage() {
    let sandbox = Sandbox::new();
    let backup = sandbox.path().join("garbage.json");
    std::fs::write(&backup, "{\"hello\": \"world\"}").unwrap();

    sandbox
        .cmd()
        .arg("import")
        .arg(&backup)
        .assert()
        .failure()
        .stderr(predicate::str::contains("E201"));
}

#[test]
fn test_config_commands() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .args(["config", "set", "security.session_timeout_minutes", "30"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set security.session_timeout_minutes = 30"));

    sandbox
        .cmd()
        .args(["config", "get", "security.session_timeout_minutes"])
        .assert()
        .success()
        .stdout(predicate::str::diff("30\n"));

    sandbox
        .cmd()
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("security.kdf_iterations = 600000"));

    sandbox
        .cmd()
        .args(["config", "set", "security.kdf_iterations", "10"])
        .assert()
        .failure();

    sandbox
        .cmd()
        .args(["config", "get", "llm.model"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("tabkeep config list"));
}

#[test]
fn test_check_password() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .args(["check-password", "Str0ng!Pass"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("strong"));

    sandbox
        .cmd()
        .args(["check-password", "short"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("rejected"));
}
