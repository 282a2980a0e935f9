//! Resolve an agent by id, run one task, and normalize what comes back.
//!
//! Collaborator failures never escape [`AgentInvoker::invoke`]: they become a
//! degraded record with `status: "error"` so the controller decides what to
//! do with them. The only error returned is an unknown agent id.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, instrument};

use crate::core::normalize::{CONTENT_KEY, apply_output, normalize_outcome, safe_serialize};
use crate::core::types::{AgentOutcome, Record, Status};
use crate::core::workflow::WorkflowConfig;
use crate::io::agent::{AgentProvider, AgentRequest};

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("agent '{0}' not found in workflow config")]
    AgentNotFound(String),
}

/// Runs agents declared in one workflow.
pub struct AgentInvoker<'a, P> {
    config: &'a WorkflowConfig,
    provider: &'a P,
}

impl<'a, P: AgentProvider> AgentInvoker<'a, P> {
    pub fn new(config: &'a WorkflowConfig, provider: &'a P) -> Self {
        Self { config, provider }
    }

    /// Run `agent_id` on `payload` and fold its normalized output into a copy
    /// of the payload, stamped with `status` and `last_updated`. The agent's
    /// `content` replaces the payload's.
    #[instrument(skip(self, payload))]
    pub fn invoke(&self, agent_id: &str, payload: &Record) -> Result<Record, InvokeError> {
        match self.dispatch(agent_id, payload)? {
            Ok(outcome) => {
                let normalized = normalize_outcome(outcome);
                debug!(output = %safe_serialize(&normalized), "agent output normalized");
                let mut merged = apply_output(payload, &normalized);
                stamp(&mut merged, Status::Success);
                info!("agent task succeeded");
                Ok(merged)
            }
            Err(err) => {
                error!(err = %format!("{err:#}"), "agent task failed");
                Ok(degraded(payload, &err))
            }
        }
    }

    /// Run `agent_id` and hand back its raw outcome.
    ///
    /// The outer error is an unknown agent; the inner one is whatever the
    /// collaborator reported while being built or run.
    pub fn dispatch(
        &self,
        agent_id: &str,
        payload: &Record,
    ) -> Result<anyhow::Result<AgentOutcome>, InvokeError> {
        let def = self
            .config
            .agent(agent_id)
            .ok_or_else(|| InvokeError::AgentNotFound(agent_id.to_string()))?;
        let request = AgentRequest::user(safe_serialize(payload));
        debug!(agent_id, bytes = request.content.len(), "dispatching agent request");
        Ok(self
            .provider
            .agent(def)
            .and_then(|agent| agent.run(&request)))
    }
}

/// Payload plus the error text, marked as failed.
pub fn degraded(payload: &Record, err: &anyhow::Error) -> Record {
    let mut record = payload.clone();
    record.insert(
        CONTENT_KEY.to_string(),
        Value::String(format!("{err:#}")),
    );
    stamp(&mut record, Status::Error);
    record
}

fn stamp(record: &mut Record, status: Status) {
    record.insert(
        "status".to_string(),
        Value::String(status.as_str().to_string()),
    );
    record.insert(
        "last_updated".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
}
