//! Table-driven lookups over the workflow transition list.
//!
//! The state set is implied by the edges: every `from_state`, every
//! `to_state`, plus `initial_state`. A state without outgoing edges is terminal.

use std::collections::BTreeSet;

use crate::core::types::Record;
use crate::core::workflow::{Transition, WorkflowConfig};

/// All state names, sorted.
pub fn states(config: &WorkflowConfig) -> BTreeSet<&str> {
    let mut states = BTreeSet::new();
    states.insert(config.initial_state.as_str());
    for transition in &config.transitions {
        states.insert(transition.from_state.as_str());
        states.insert(transition.to_state.as_str());
    }
    states
}

pub fn is_state(config: &WorkflowConfig, state: &str) -> bool {
    state == config.initial_state
        || config
            .transitions
            .iter()
            .any(|t| t.from_state == state || t.to_state == state)
}

/// Edges leaving `from`, in declaration order.
pub fn outgoing<'a>(config: &'a WorkflowConfig, from: &str) -> Vec<&'a Transition> {
    config
        .transitions
        .iter()
        .filter(|t| t.from_state == from)
        .collect()
}

/// The edge `from -> to`, if declared. The first match wins on duplicates.
pub fn find_transition<'a>(
    config: &'a WorkflowConfig,
    from: &str,
    to: &str,
) -> Option<&'a Transition> {
    config
        .transitions
        .iter()
        .find(|t| t.from_state == from && t.to_state == to)
}

pub fn is_terminal(config: &WorkflowConfig, state: &str) -> bool {
    !config.transitions.iter().any(|t| t.from_state == state)
}

/// Required fields of `state` that are absent from `data`, in declared order.
pub fn missing_fields(config: &WorkflowConfig, state: &str, data: &Record) -> Vec<String> {
    config
        .required_fields(state)
        .iter()
        .filter(|field| !data.contains_key(field.as_str()))
        .cloned()
        .collect()
}

/// Where an unattended run goes from `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep<'a> {
    /// No outgoing edges.
    Terminal,
    /// Exactly one outgoing edge.
    Next(&'a Transition),
    /// Several outgoing edges; the caller must pick a target.
    FanOut(Vec<&'a str>),
}

pub fn next_step<'a>(config: &'a WorkflowConfig, from: &str) -> NextStep<'a> {
    let edges = outgoing(config, from);
    match edges.len() {
        0 => NextStep::Terminal,
        1 => NextStep::Next(edges[0]),
        _ => NextStep::FanOut(edges.into_iter().map(|t| t.to_state.as_str()).collect()),
    }
}
