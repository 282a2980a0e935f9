//! CLI tests: spawn the agentflow binary against a fixture workflow whose
//! agents are `cat`, and check exit codes and stored sessions.

use std::path::Path;
use std::process::{Command, Output};

use agentflow::exit_codes;
use agentflow::io::config::{Settings, load_settings, write_settings};
use agentflow::io::session_store::{FileSessionStore, SessionStore};
use agentflow::test_support::write_workflow_fixture;

fn agentflow(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_agentflow"))
        .current_dir(root)
        .args(["--config", "config.toml"])
        .args(args)
        .output()
        .expect("run agentflow")
}

fn setup(root: &Path) -> FileSessionStore {
    let settings = write_workflow_fixture(root, &["cat"]).expect("fixture");
    write_settings(&root.join("config.toml"), &settings).expect("write settings");
    FileSessionStore::new(settings.sessions_dir)
}

#[test]
fn init_writes_default_settings() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = agentflow(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let path = temp.path().join("config.toml");
    assert_eq!(load_settings(&path).expect("load"), Settings::default());

    std::fs::write(&path, "formatter_agent = \"fixer\"\n").expect("edit");
    let again = agentflow(temp.path(), &["init"]);
    assert_eq!(again.status.code(), Some(exit_codes::OK));
    assert_eq!(load_settings(&path).expect("load").formatter_agent, "fixer");
}

#[test]
fn validate_accepts_fixture_workflow() {
    let temp = tempfile::tempdir().expect("tempdir");
    setup(temp.path());

    let output = agentflow(temp.path(), &["validate", "junior_developer"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ok: junior_developer"));
}

#[test]
fn validate_unknown_workflow_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    setup(temp.path());

    let output = agentflow(temp.path(), &["validate", "nonexistent_workflow"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn illegal_transition_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = setup(temp.path());

    let output = agentflow(
        temp.path(),
        &["transition", "junior_developer", "testing", "--session", "cli"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));
    assert!(store.load("cli").expect("load").is_none());
}

#[cfg(unix)]
#[test]
fn transition_commits_and_status_reports_it() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = setup(temp.path());

    let output = agentflow(
        temp.path(),
        &["transition", "junior_developer", "requirement", "--session", "cli"],
    );
    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stored = store.load("cli").expect("load").expect("stored");
    assert_eq!(stored.current_state, "requirement");
    assert_eq!(stored.state_data["status"], "success");

    let status = agentflow(temp.path(), &["status", "--session", "cli"]);
    assert_eq!(status.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&status.stdout).contains("\"current_state\":\"requirement\""));
}

#[test]
fn status_of_unknown_session_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    setup(temp.path());

    let output = agentflow(temp.path(), &["status", "--session", "nobody"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}
