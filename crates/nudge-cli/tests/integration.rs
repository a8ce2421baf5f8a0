#![allow(deprecated)]
use assert_cmd::Command;
use nudge_core::config::Config;
use predicates::prelude::*;
use tempfile::TempDir;

const REPOS_YAML: &str = r#"
version: 1
repos:
  alice:
    - name: web
      last_modified: 2026-01-01T00:00:00Z
    - name: api
      last_modified: 2026-01-02T00:00:00Z
"#;

fn nudge(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("nudge").unwrap();
    cmd.current_dir(dir.path())
        .env("NUDGE_CONFIG", dir.path().join("nudge.yaml"))
        .env_remove("NUDGE_SERVER")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &TempDir, yaml: &str) {
    std::fs::write(dir.path().join("nudge.yaml"), yaml).unwrap();
}

/// Run the server on an ephemeral port in a background thread and return its URL.
fn spawn_server(yaml: &str) -> String {
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            let state = nudge_server::AppState::open(config).unwrap();
            nudge_server::serve_on(state, listener).await.unwrap();
        });
    });
    format!("http://{}", rx.recv().unwrap())
}

// ---------------------------------------------------------------------------
// nudge --help
// ---------------------------------------------------------------------------

#[test]
fn help_lists_commands() {
    let dir = TempDir::new().unwrap();
    nudge(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("scan"))
        .stdout(predicate::str::contains("cancel"))
        .stdout(predicate::str::contains("status"));
}

// ---------------------------------------------------------------------------
// nudge config
// ---------------------------------------------------------------------------

#[test]
fn config_init_writes_loadable_defaults() {
    let dir = TempDir::new().unwrap();
    nudge(&dir)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote"));
    let cfg = Config::load(&dir.path().join("nudge.yaml")).unwrap();
    assert_eq!(cfg, Config::default());

    nudge(&dir)
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    nudge(&dir).args(["config", "init", "--force"]).assert().success();
}

#[test]
fn config_validate_accepts_defaults() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "version: 1\n");
    nudge(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_validate_rejects_zero_batch_size() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "coordination:\n  batch_size: 0\n");
    nudge(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn config_validate_reports_warnings_as_json() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "coordination:\n  scan_lock_ttl_secs: 60\n");
    let output = nudge(&dir)
        .args(["config", "validate", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value["warnings"][0]["level"], "warning");
}

#[test]
fn serve_refuses_invalid_config() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "coordination:\n  batch_size: 0\n");
    nudge(&dir)
        .args(["serve", "--port", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("refusing to start"))
        .stderr(predicate::str::contains("invalid config: coordination.batch_size"));
}

#[test]
fn config_validate_requires_file() {
    let dir = TempDir::new().unwrap();
    nudge(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load"));
}

#[test]
fn config_show_fills_defaults() {
    let dir = TempDir::new().unwrap();
    nudge(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("batch_size: 5"))
        .stdout(predicate::str::contains("type: memory"));
}

#[test]
fn config_show_resolves_store_path_next_to_config() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "store:\n  type: redb\n  path: data/store.redb\n");
    let output = nudge(&dir)
        .args(["config", "show", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let path = value["store"]["path"].as_str().unwrap();
    assert!(path.ends_with("data/store.redb"));
    assert!(path.starts_with(dir.path().to_str().unwrap()));
}

// ---------------------------------------------------------------------------
// nudge scan / status / cancel
// ---------------------------------------------------------------------------

#[test]
fn scan_then_status_against_running_server() {
    let dir = TempDir::new().unwrap();
    let server = spawn_server(REPOS_YAML);

    nudge(&dir)
        .args(["scan", "alice", "--server", &server])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("processed 2/2"));

    let output = nudge(&dir)
        .args(["status", "alice", "--json", "--server", &server])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert!(value["active"].is_null());
    assert_eq!(value["last_report"]["analyzed"], 2);
}

#[test]
fn cancel_with_nothing_running() {
    let dir = TempDir::new().unwrap();
    let server = spawn_server(REPOS_YAML);
    nudge(&dir)
        .args(["cancel", "alice", "--server", &server])
        .assert()
        .success()
        .stdout(predicate::str::contains("No sweep is running"));
}

#[test]
fn server_errors_are_reported() {
    let dir = TempDir::new().unwrap();
    let server = spawn_server(REPOS_YAML);
    nudge(&dir)
        .args(["status", "bad!owner", "--server", &server])
        .assert()
        .failure()
        .stderr(predicate::str::contains("server returned 400"));
}

#[test]
fn unreachable_server_fails_cleanly() {
    let dir = TempDir::new().unwrap();
    nudge(&dir)
        .args(["status", "alice", "--server", "http://127.0.0.1:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not reach nudge server"));
}
