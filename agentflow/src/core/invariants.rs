//! Semantic workflow invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::core::fsm::is_state;
use crate::core::workflow::WorkflowConfig;

/// Check semantic invariants of a workflow definition:
/// - `initial_state` is a state of the transition table
/// - agent ids are unique
/// - every transition `agent_id` names a declared agent
/// - every `state_data` key is a state
///
/// Returns stable error messages (empty on success).
pub fn validate_workflow_invariants(config: &WorkflowConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if !config.transitions.is_empty()
        && !config
            .transitions
            .iter()
            .any(|t| t.from_state == config.initial_state || t.to_state == config.initial_state)
    {
        errors.push(format!(
            "initial_state '{}' does not appear in any transition",
            config.initial_state
        ));
    }

    let mut seen = HashSet::new();
    for agent in &config.agents {
        if !seen.insert(agent.id.as_str()) {
            errors.push(format!("duplicate agent id '{}'", agent.id));
        }
    }

    for (index, transition) in config.transitions.iter().enumerate() {
        if config.agent(&transition.agent_id).is_none() {
            errors.push(format!(
                "transitions[{}] ({} -> {}): unknown agent '{}'",
                index, transition.from_state, transition.to_state, transition.agent_id
            ));
        }
    }

    for state in config.state_data.keys() {
        if !is_state(config, state) {
            errors.push(format!("state_data: unknown state '{}'", state));
        }
    }

    errors
}
