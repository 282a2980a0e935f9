//! Declarative workflow definition (`*.workflow.json`).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Immutable workflow definition: agents, per-state requirements and the
/// transition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub name: String,
    pub description: String,
    /// Initial state-data document, relative to the workflow file.
    pub input_file: PathBuf,
    pub agents: Vec<AgentDef>,
    /// Requirements keyed by target state name.
    pub state_data: BTreeMap<String, StateRequirements>,
    pub initial_state: String,
    pub transitions: Vec<Transition>,
}

/// An agent declaration. `config_path` points at the agent profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDef {
    pub id: String,
    pub config_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRequirements {
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// Directed edge of the state machine, bound to the agent that does the work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from_state: String,
    pub to_state: String,
    pub agent_id: String,
}

impl WorkflowConfig {
    pub fn agent(&self, id: &str) -> Option<&AgentDef> {
        self.agents.iter().find(|agent| agent.id == id)
    }

    /// Required fields for `state`; empty when the state declares none.
    pub fn required_fields(&self, state: &str) -> &[String] {
        self.state_data
            .get(state)
            .map(|req| req.required_fields.as_slice())
            .unwrap_or(&[])
    }
}
