//! Agent collaborator abstraction.
//!
//! The [`Agent`] trait decouples the workflow controller from the backend
//! that actually talks to a model (currently a subprocess, see
//! [`crate::io::command_agent`]). Tests use scripted agents that return
//! predetermined outcomes without spawning anything.

use anyhow::Result;
use serde::Serialize;

use crate::core::types::AgentOutcome;
use crate::core::workflow::AgentDef;

/// A single message handed to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentRequest {
    pub role: String,
    /// Serialized task payload.
    pub content: String,
}

impl AgentRequest {
    pub fn user(content: String) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

/// A callable agent. Errors are reported, never panicked.
pub trait Agent {
    fn run(&self, request: &AgentRequest) -> Result<AgentOutcome>;
}

/// Builds agents from their workflow declarations.
pub trait AgentProvider {
    fn agent(&self, def: &AgentDef) -> Result<Box<dyn Agent + '_>>;
}

impl<T: AgentProvider + ?Sized> AgentProvider for &T {
    fn agent(&self, def: &AgentDef) -> Result<Box<dyn Agent + '_>> {
        (**self).agent(def)
    }
}
