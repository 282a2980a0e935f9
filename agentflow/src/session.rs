//! Wiring for the session commands: settings + workflow + store + agents.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::controller::{ControllerOptions, WorkflowController};
use crate::core::state_data::WorkflowStateData;
use crate::core::types::Record;
use crate::io::command_agent::CommandAgentProvider;
use crate::io::config::Settings;
use crate::io::session_store::{FileSessionStore, SessionState, SessionStore};
use crate::io::workflow_loader::{LoadedWorkflow, WorkflowLoader, read_record};

/// Controller backed by subprocess agents and on-disk sessions.
pub type FileController = WorkflowController<CommandAgentProvider, FileSessionStore>;

/// Default step budget for `agentflow run`.
pub const DEFAULT_MAX_STEPS: usize = 32;

impl From<&Settings> for ControllerOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            formatter_agent: settings.formatter_agent.clone(),
            on_agent_error: settings.on_agent_error,
        }
    }
}

pub fn load_workflow(settings: &Settings, identifier: &str) -> Result<LoadedWorkflow> {
    WorkflowLoader::new(&settings.workflows_dir)
        .load(identifier)
        .with_context(|| format!("load workflow '{identifier}'"))
}

/// Build a controller for `session_id`, resuming it if it was stored before.
pub fn open_controller(
    settings: &Settings,
    workflow: &LoadedWorkflow,
    session_id: &str,
) -> Result<FileController> {
    let provider = CommandAgentProvider::new(workflow.base_dir(), settings.agent.clone());
    let store = FileSessionStore::new(&settings.sessions_dir);
    let controller = WorkflowController::new(
        workflow.config.clone(),
        session_id,
        provider,
        store,
        ControllerOptions::from(settings),
    )
    .with_context(|| format!("open session '{session_id}'"))?;
    Ok(controller)
}

/// State data for the next transition: an explicit `--data` file wins, then
/// the stored session data, then the workflow's `input_file`.
pub fn starting_data(
    controller: &FileController,
    workflow: &LoadedWorkflow,
    data_path: Option<&Path>,
) -> Result<Record> {
    if let Some(path) = data_path {
        return read_record(path);
    }
    let stored = controller.state_data();
    if !stored.is_empty() {
        info!(session_id = controller.session_id(), "continuing from stored state data");
        return Ok(stored);
    }
    workflow
        .load_input()
        .with_context(|| format!("load input for workflow '{}'", workflow.config.name))
}

pub fn load_session(settings: &Settings, session_id: &str) -> Result<Option<SessionState>> {
    let store = FileSessionStore::new(&settings.sessions_dir);
    store
        .load(session_id)
        .with_context(|| format!("load session '{session_id}'"))
}

/// One-line description of a stored session for `agentflow status`.
pub fn summarize(session: &SessionState) -> String {
    let head = format!(
        "{} [{}] at {} (revision {})",
        session.session_id, session.workflow, session.current_state, session.revision
    );
    match WorkflowStateData::from_record(session.state_data.clone()) {
        Ok(mut data) => {
            data.normalize();
            let updated = data
                .last_updated
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            let project = if data.project_name.is_empty() {
                "unnamed project".to_string()
            } else {
                data.project_name.clone()
            };
            format!(
                "{head}: {project}, status {}, content {}, updated {updated}",
                data.status.as_str(),
                data.content_kind()
            )
        }
        Err(err) => format!("{head}: state data does not match the project shape ({err})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::PipelineStop;
    use crate::test_support::{record, write_workflow_fixture};
    use serde_json::json;

    #[test]
    fn summary_reads_typed_fields() {
        let session = SessionState {
            session_id: "demo".to_string(),
            workflow: "junior_developer".to_string(),
            current_state: "technical".to_string(),
            state_data: record(json!({
                "project_name": "Test Project",
                "status": "success",
                "last_updated": "2024-05-01T12:00:00Z"
            })),
            revision: 2,
            updated_at: None,
        };
        assert_eq!(
            summarize(&session),
            "demo [junior_developer] at technical (revision 2): Test Project, status success, content none, updated 2024-05-01T12:00:00+00:00"
        );

        let raw = SessionState {
            state_data: record(json!({"content": "# Design\nlayers", "status": "error"})),
            ..session.clone()
        };
        assert!(summarize(&raw).contains("status error, content markdown, updated never"));

        let odd = SessionState {
            state_data: record(json!({"user_stories": "not a list"})),
            ..session
        };
        assert!(summarize(&odd).contains("does not match"));
    }

    #[test]
    fn starting_data_prefers_explicit_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = write_workflow_fixture(temp.path(), &["cat"]).expect("fixture");
        let workflow = load_workflow(&settings, "junior_developer").expect("workflow");
        let controller = open_controller(&settings, &workflow, "s1").expect("controller");

        let data = starting_data(&controller, &workflow, None).expect("input");
        assert_eq!(data["project_name"], "Test Project");

        let path = temp.path().join("data.json");
        std::fs::write(&path, json!({"project_name": "Other"}).to_string()).expect("write");
        let data = starting_data(&controller, &workflow, Some(&path)).expect("file");
        assert_eq!(data["project_name"], "Other");
    }

    #[cfg(unix)]
    #[test]
    fn transition_persists_session_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = write_workflow_fixture(temp.path(), &["cat"]).expect("fixture");
        let workflow = load_workflow(&settings, "junior_developer").expect("workflow");
        let mut controller = open_controller(&settings, &workflow, "s1").expect("controller");

        let data = starting_data(&controller, &workflow, None).expect("input");
        let report = controller.transition("requirement", data).expect("transition");
        assert_eq!(report.to, "requirement");

        let stored = load_session(&settings, "s1").expect("load").expect("stored");
        assert_eq!(stored.current_state, "requirement");
        assert!(settings.sessions_dir.join("s1.json").is_file());

        let resumed = open_controller(&settings, &workflow, "s1").expect("reopen");
        assert_eq!(resumed.current_state(), "requirement");
        let data = starting_data(&resumed, &workflow, None).expect("stored data");
        assert_eq!(data["status"], "success");
    }

    #[cfg(unix)]
    #[test]
    fn pipeline_stops_when_echoed_prompt_lacks_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = write_workflow_fixture(temp.path(), &["cat"]).expect("fixture");
        let workflow = load_workflow(&settings, "junior_developer").expect("workflow");
        let mut controller = open_controller(&settings, &workflow, "s2").expect("controller");

        let data = starting_data(&controller, &workflow, None).expect("input");
        let outcome = controller.run_pipeline(data, DEFAULT_MAX_STEPS);
        assert_eq!(outcome.visited, vec!["requirement".to_string()]);
        assert!(matches!(outcome.stop, PipelineStop::Rejected(_)));
        assert_eq!(controller.current_state(), "requirement");
    }
}
