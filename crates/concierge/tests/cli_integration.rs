//! CLI integration tests for the Concierge command-line interface.
//!
//! Commands that touch storage run against the mock provider with a
//! throwaway data directory, so no network or API key is needed.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the concierge binary.
fn concierge() -> Command {
    Command::cargo_bin("concierge").unwrap()
}

/// An isolated environment: empty user config dir, data dir, and a config
/// file selecting the mock provider.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self::with_extra("")
    }

    fn with_extra(extra: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let config = format!(
            "[llm]\nprovider = \"mock\"\n\n[storage]\ndata_dir = {:?}\n\n[logging]\nfile = false\n{}",
            data_dir.display().to_string(),
            extra
        );
        std::fs::write(dir.path().join("test.toml"), config).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn cmd(&self) -> Command {
        let mut cmd = concierge();
        cmd.current_dir(self.path())
            .env("CONCIERGE_CONFIG_DIR", self.path().join("user"))
            .env_remove("CONCIERGE_CONFIG")
            .env_remove("RUST_LOG")
            .arg("--config")
            .arg(self.path().join("test.toml"));
        cmd
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_displays() {
    concierge()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Concierge"));
}

#[test]
fn test_version_displays() {
    concierge()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("concierge"));
}

#[test]
fn test_help_lists_subcommands() {
    concierge()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("ask"))
        .stdout(predicate::str::contains("knowledge"))
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("sessions"))
        .stdout(predicate::str::contains("calc"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_unknown_subcommand_rejected() {
    concierge().arg("frobnicate").assert().failure();
}

#[test]
fn test_ask_requires_message() {
    concierge()
        .arg("ask")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Calculator
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_calc_evaluates_expression() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["calc", "2 * (3 + 4)"])
        .assert()
        .success()
        .stdout(predicate::str::diff("14\n"));
}

#[test]
fn test_calc_rejects_division_by_zero() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["calc", "1 / 0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("division by zero"));
}

#[test]
fn test_calc_rejects_unknown_names() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["calc", "system(1)"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown function"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_ask_without_streaming() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["ask", "--no-stream", "hello there"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Echo: hello there"));
}

#[test]
fn test_ask_streams_reply() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["ask", "streamed hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Echo: streamed hello"));
}

#[test]
fn test_ask_json_outcome() {
    let sandbox = Sandbox::new();
    let output = sandbox
        .cmd()
        .args(["--json", "ask", "--no-stream", "--session", "json-1", "hi"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["session_id"], "json-1");
    assert_eq!(outcome["message"], "Echo: hi");
    assert_eq!(outcome["turn_count"], 2);
}

#[test]
fn test_ask_rejects_blank_message() {
    let sandbox = Sandbox::new();
    sandbox.cmd().args(["ask", "   "]).assert().failure();
}

#[test]
fn test_history_persists_between_invocations() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["ask", "--session", "s1", "--user", "alice", "first"])
        .assert()
        .success();
    sandbox
        .cmd()
        .args(["ask", "--session", "s1", "second"])
        .assert()
        .success();

    sandbox
        .cmd()
        .args(["sessions", "show", "s1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Echo: first"))
        .stdout(predicate::str::contains("Echo: second"));

    sandbox
        .cmd()
        .args(["sessions", "list", "--user", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("s1"));
}

#[test]
fn test_sessions_delete() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["ask", "--session", "gone", "hello"])
        .assert()
        .success();
    sandbox
        .cmd()
        .args(["sessions", "delete", "gone"])
        .assert()
        .success();
    sandbox
        .cmd()
        .args(["sessions", "show", "gone"])
        .assert()
        .failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// Knowledge and Search
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_knowledge_add_then_keyword_search() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args([
            "knowledge",
            "add",
            "--title",
            "Return policy",
            "--body",
            "Items can be returned within 30 days.",
            "--tag",
            "returns",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Return policy"));

    sandbox
        .cmd()
        .args(["search", "return", "--mode", "keyword"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Return policy"));
}

#[test]
fn test_knowledge_import_and_categories() {
    let sandbox = Sandbox::new();
    let file = sandbox.path().join("entries.json");
    std::fs::write(
        &file,
        r#"[
            {"title": "Store hours", "body": "Nine to five", "category": "store"},
            {"title": "Warranty", "body": "Two years", "category": "support", "tags": ["warranty"]}
        ]"#,
    )
    .unwrap();

    sandbox
        .cmd()
        .args(["knowledge", "import"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 2 entries"));

    sandbox
        .cmd()
        .args(["knowledge", "categories"])
        .assert()
        .success()
        .stdout(predicate::str::diff("store\nsupport\n"));

    sandbox
        .cmd()
        .args(["knowledge", "list", "--category", "store"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Store hours"))
        .stdout(predicate::str::contains("Warranty").not());
}

#[test]
fn test_search_rejects_unknown_mode() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["search", "anything", "--mode", "fuzzy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown search mode"));
}

#[test]
fn test_seed_only_fills_empty_catalog() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["knowledge", "seed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Seeded"));
    sandbox
        .cmd()
        .args(["knowledge", "seed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing seeded"));
}

#[test]
fn test_vector_search_with_mock_embedder() {
    let sandbox = Sandbox::with_extra(
        "\n[embedding]\nprovider = \"mock\"\ndimensions = 32\n\n[retrieval]\nvector_index = \"memory\"\n",
    );
    sandbox
        .cmd()
        .args(["knowledge", "seed"])
        .assert()
        .success();

    sandbox
        .cmd()
        .args(["--json", "search", "technical support", "--mode", "vector", "--limit", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"matched_by\": \"vector\""));
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_masks_plaintext_key() {
    let sandbox = Sandbox::new();
    let config = sandbox.path().join("keyed.toml");
    std::fs::write(
        &config,
        "[llm]\nprovider = \"mock\"\napi_key = \"sk-very-secret\"\n",
    )
    .unwrap();

    concierge()
        .current_dir(sandbox.path())
        .env("CONCIERGE_CONFIG_DIR", sandbox.path().join("user"))
        .arg("--config")
        .arg(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sk-very-secret").not());
}

#[test]
fn test_config_path_uses_config_dir_env() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"))
        .stdout(predicate::str::contains("user"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let sandbox = Sandbox::new();
    concierge()
        .current_dir(sandbox.path())
        .env("CONCIERGE_CONFIG_DIR", sandbox.path().join("user"))
        .args(["--config", "does-not-exist.toml", "calc", "1"])
        .assert()
        .failure();
}
