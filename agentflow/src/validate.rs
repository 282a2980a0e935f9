//! `agentflow validate`: load a workflow and every agent profile it names.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::core::fsm;
use crate::io::profile::load_profile;
use crate::io::workflow_loader::WorkflowLoader;

/// What a valid workflow contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSummary {
    pub name: String,
    pub path: PathBuf,
    pub initial_state: String,
    pub states: Vec<String>,
    pub terminal_states: Vec<String>,
    pub agents: Vec<String>,
    pub transitions: usize,
}

/// Validate the workflow document, then load each agent profile.
pub fn validate_workflow(loader: &WorkflowLoader, identifier: &str) -> Result<WorkflowSummary> {
    let loaded = loader
        .load(identifier)
        .with_context(|| format!("load workflow '{identifier}'"))?;
    let config = &loaded.config;

    for agent in &config.agents {
        let path = loaded.resolve(&agent.config_path);
        load_profile(&path).with_context(|| format!("load profile for agent '{}'", agent.id))?;
    }

    let states = fsm::states(config);
    Ok(WorkflowSummary {
        name: config.name.clone(),
        path: loaded.path.clone(),
        initial_state: config.initial_state.clone(),
        terminal_states: states
            .iter()
            .filter(|state| fsm::is_terminal(config, state))
            .map(|state| state.to_string())
            .collect(),
        states: states.iter().map(|state| state.to_string()).collect(),
        agents: config.agents.iter().map(|agent| agent.id.clone()).collect(),
        transitions: config.transitions.len(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::write_workflow_fixture;

    #[test]
    fn summarizes_valid_workflow() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = write_workflow_fixture(temp.path(), &["cat"]).expect("fixture");

        let loader = WorkflowLoader::new(&settings.workflows_dir);
        let summary = validate_workflow(&loader, "junior_developer").expect("validate");
        assert_eq!(summary.name, "junior_developer");
        assert_eq!(summary.initial_state, "init");
        assert_eq!(summary.terminal_states, vec!["testing".to_string()]);
        assert_eq!(summary.states.len(), 5);
        assert_eq!(summary.agents.len(), 5);
        assert_eq!(summary.transitions, 4);
    }

    #[test]
    fn missing_profile_fails_validation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = write_workflow_fixture(temp.path(), &["cat"]).expect("fixture");
        fs::remove_file(settings.workflows_dir.join("agents/engineer.agent.json"))
            .expect("remove profile");

        let loader = WorkflowLoader::new(&settings.workflows_dir);
        let err = validate_workflow(&loader, "junior_developer").expect_err("should fail");
        assert!(format!("{err:#}").contains("agent 'engineer'"));
    }

    #[test]
    fn shipped_sample_workflow_is_valid() {
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/workflows");
        let summary =
            validate_workflow(&WorkflowLoader::new(dir), "junior_developer").expect("validate");
        assert_eq!(summary.agents.len(), 5);
        assert!(summary.terminal_states.is_empty());
    }
}
