//! Binary-level tests for the draftpilot CLI.
//!
//! Every test runs inside its own temp directory so the default relative
//! paths (ledger, cache, runs) never touch the repository.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use draftpilot::budget::{BudgetConfig, Charge, Period, UsageLedger};

const HEADER_ONLY_SHEET: &str = r#"{"values": [["Name", "Email", "Context", "Importance"]]}"#;

/// Get a Command for the draftpilot binary with a clean environment.
#[allow(deprecated)]
fn draftpilot_cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("draftpilot").expect("Failed to find draftpilot binary");
    cmd.current_dir(dir)
        .env_remove("DRAFTPILOT_CONFIG")
        .env_remove("GOOGLE_ACCESS_TOKEN")
        .env_remove("GOOGLE_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn seed_ledger(dir: &Path) {
    let mut ledger =
        UsageLedger::open_file(BudgetConfig::default(), dir.join("api_usage.json")).expect("ledger");
    let period: Period = "2026-10".parse().expect("period");
    ledger
        .record_charge(
            period,
            Charge::new(0.0051).with_model("gpt2").with_output_tokens(500),
        )
        .expect("charge");
}

#[test]
fn test_help_lists_subcommands() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    draftpilot_cmd(temp_dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("usage"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn test_init_writes_config_and_refuses_overwrite() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    draftpilot_cmd(temp_dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("draftpilot.toml"));

    let written = fs::read_to_string(temp_dir.path().join("draftpilot.toml")).expect("read config");
    assert!(written.contains("monthly_limit = 50.0"));
    assert!(written.contains("[tiers.premium]"));

    draftpilot_cmd(temp_dir.path())
        .arg("init")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));

    draftpilot_cmd(temp_dir.path())
        .args(["init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_usage_reports_seeded_month() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    seed_ledger(temp_dir.path());

    draftpilot_cmd(temp_dir.path())
        .args(["usage", "--month", "2026-10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Month: 2026-10"))
        .stdout(predicate::str::contains("Requests: 1"))
        .stdout(predicate::str::contains("gpt2: 1 calls"));
}

#[test]
fn test_usage_json_output() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    seed_ledger(temp_dir.path());

    let output = draftpilot_cmd(temp_dir.path())
        .args(["usage", "--month", "2026-10", "--json"])
        .output()
        .expect("run usage");
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["period"], "2026-10");
    assert_eq!(report["requests"], 1);
    assert_eq!(report["output_tokens"], 500);
}

#[test]
fn test_usage_without_ledger_shows_full_budget() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    draftpilot_cmd(temp_dir.path())
        .args(["usage", "--month", "2026-01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Requests: 0"))
        .stdout(predicate::str::contains("Budget Remaining: $50.0000"));
}

#[test]
fn test_usage_rejects_bad_month() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    draftpilot_cmd(temp_dir.path())
        .args(["usage", "--month", "October"])
        .assert()
        .code(2);
}

#[test]
fn test_run_with_missing_contacts_file_exits_2() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    draftpilot_cmd(temp_dir.path())
        .env("HUGGINGFACE_API_KEY", "hf_test")
        .args(["run", "--contacts", "missing.json", "--dry-run", "--json"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot list contacts"));
}

#[test]
fn test_run_without_api_key_exits_2() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    fs::write(temp_dir.path().join("contacts.json"), HEADER_ONLY_SHEET).expect("write contacts");

    draftpilot_cmd(temp_dir.path())
        .env_remove("HUGGINGFACE_API_KEY")
        .args(["run", "--contacts", "contacts.json", "--dry-run"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("HUGGINGFACE_API_KEY"));
}

#[test]
fn test_run_with_empty_sheet_succeeds() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    fs::write(temp_dir.path().join("contacts.json"), HEADER_ONLY_SHEET).expect("write contacts");

    let output = draftpilot_cmd(temp_dir.path())
        .env("HUGGINGFACE_API_KEY", "hf_test")
        .args(["run", "--contacts", "contacts.json", "--dry-run", "--json"])
        .output()
        .expect("run");
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(summary["total_contacts"], 0);
    assert_eq!(summary["generated"], 0);
    assert!(summary.get("halted").is_none());

    let runs = fs::read_dir(temp_dir.path().join(".draftpilot").join("runs"))
        .expect("runs dir")
        .count();
    assert_eq!(runs, 1);
}

#[test]
fn test_run_with_corrupt_ledger_exits_1() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    fs::write(temp_dir.path().join("contacts.json"), HEADER_ONLY_SHEET).expect("write contacts");
    fs::write(temp_dir.path().join("api_usage.json"), "{ not json").expect("write ledger");

    draftpilot_cmd(temp_dir.path())
        .env("HUGGINGFACE_API_KEY", "hf_test")
        .args(["run", "--contacts", "contacts.json", "--dry-run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("corrupt"));

    // The corrupt file is left for inspection, never overwritten.
    let ledger = fs::read_to_string(temp_dir.path().join("api_usage.json")).expect("read");
    assert_eq!(ledger, "{ not json");
}

#[test]
fn test_run_rejects_zero_limit() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    fs::write(temp_dir.path().join("contacts.json"), HEADER_ONLY_SHEET).expect("write contacts");

    draftpilot_cmd(temp_dir.path())
        .env("HUGGINGFACE_API_KEY", "hf_test")
        .args(["run", "--contacts", "contacts.json", "--dry-run", "--limit", "0"])
        .assert()
        .code(2);
}

#[test]
fn test_config_file_overrides_ledger_path() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let state = temp_dir.path().join("state");
    fs::create_dir_all(&state).expect("mkdir");
    seed_ledger(&state);
    fs::write(
        temp_dir.path().join("custom.toml"),
        "[paths]\nledger = \"state/api_usage.json\"\n\n[budget]\nmonthly_limit = 10.0\n",
    )
    .expect("write config");

    draftpilot_cmd(temp_dir.path())
        .args(["--config", "custom.toml", "usage", "--month", "2026-10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Requests: 1"))
        .stdout(predicate::str::contains("/ $10.00"));
}
