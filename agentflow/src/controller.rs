//! Workflow state machine: validate, delegate, normalize, commit.
//!
//! A transition only advances `current_state` after the target's required
//! fields are present and the delegated agent has produced output. The
//! session is persisted before the move is reported; a failed write rolls the
//! in-memory state back.

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, error, info, info_span, instrument, warn};

use crate::core::fsm::{self, NextStep};
use crate::core::normalize::{apply_output, clean_content, safe_serialize};
use crate::core::types::{AgentErrorPolicy, AgentOutcome, Record, Status};
use crate::core::workflow::{Transition, WorkflowConfig};
use crate::invoker::{AgentInvoker, InvokeError};
use crate::io::agent::AgentProvider;
use crate::io::session_store::{SessionState, SessionStore, StoreError, validate_session_id};

/// Controller knobs that come from runner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Agent used to backfill missing required fields, if declared.
    pub formatter_agent: String,
    pub on_agent_error: AgentErrorPolicy,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            formatter_agent: "formatter".to_string(),
            on_agent_error: AgentErrorPolicy::default(),
        }
    }
}

/// Whether the formatter was asked to fill in missing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    /// Nothing was missing, or no formatter agent is declared.
    NotAttempted,
    /// The formatter ran (successfully or not).
    Attempted,
}

/// A committed transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionReport {
    pub from: String,
    pub to: String,
    pub agent_id: String,
    pub status: Status,
    pub repair: Repair,
    pub state_data: Record,
}

/// Why a transition did not advance the workflow.
#[derive(Debug, thiserror::Error)]
pub enum TransitionRejection {
    #[error("no transition {from} -> {to}")]
    Illegal { from: String, to: String },
    #[error("state '{state}' is missing required fields: {}", missing.join(", "))]
    MissingFields {
        state: String,
        missing: Vec<String>,
        repair: Repair,
    },
    #[error("agent '{agent_id}' reported an error; staying in '{state}'")]
    AgentFailed {
        agent_id: String,
        state: String,
        state_data: Record,
    },
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error("commit failed: {0}")]
    Commit(#[source] StoreError),
}

/// Why [`WorkflowController::run_pipeline`] stopped.
#[derive(Debug)]
pub enum PipelineStop {
    /// Reached a state with no outgoing transitions.
    Terminal,
    /// The current state has several outgoing transitions.
    FanOut(Vec<String>),
    /// A transition failed.
    Rejected(TransitionRejection),
    /// The step budget ran out (cyclic workflows).
    StepLimit,
}

#[derive(Debug)]
pub struct PipelineOutcome {
    /// States entered, in order.
    pub visited: Vec<String>,
    pub stop: PipelineStop,
}

/// Finite-state machine over one workflow definition and one session.
pub struct WorkflowController<P, S> {
    config: WorkflowConfig,
    session_id: String,
    current_state: String,
    /// Resumed or committed session of this workflow.
    session: Option<SessionState>,
    /// Revision the next commit must find in the store.
    base_revision: u64,
    provider: P,
    store: S,
    options: ControllerOptions,
}

impl<P: AgentProvider, S: SessionStore> WorkflowController<P, S> {
    /// Build a controller for `session_id`, resuming a stored session of the
    /// same workflow when one exists.
    pub fn new(
        config: WorkflowConfig,
        session_id: &str,
        provider: P,
        store: S,
        options: ControllerOptions,
    ) -> Result<Self, StoreError> {
        validate_session_id(session_id)?;
        let stored = store.load(session_id)?;
        let base_revision = stored.as_ref().map(|session| session.revision).unwrap_or(0);
        let session = stored.filter(|session| {
            let resumable =
                session.workflow == config.name && fsm::is_state(&config, &session.current_state);
            if !resumable {
                warn!(
                    session_id,
                    stored_workflow = %session.workflow,
                    stored_state = %session.current_state,
                    "stored session does not match workflow, starting from initial state"
                );
            }
            resumable
        });
        let current_state = match &session {
            Some(session) => {
                info!(session_id, state = %session.current_state, revision = session.revision, "resumed session");
                session.current_state.clone()
            }
            None => config.initial_state.clone(),
        };
        info!(session_id, workflow = %config.name, state = %current_state, "workflow initialized");
        Ok(Self {
            config,
            session_id: session_id.to_string(),
            current_state,
            session,
            base_revision,
            provider,
            store,
            options,
        })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn current_state(&self) -> &str {
        &self.current_state
    }

    /// Last persisted session, if any.
    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    /// Persisted state data, empty before the first commit.
    pub fn state_data(&self) -> Record {
        self.session
            .as_ref()
            .map(|session| session.state_data.clone())
            .unwrap_or_default()
    }

    /// All states of the workflow, sorted.
    pub fn states(&self) -> Vec<&str> {
        fsm::states(&self.config).into_iter().collect()
    }

    /// Transitions leaving the current state.
    pub fn valid_transitions(&self) -> Vec<&Transition> {
        fsm::outgoing(&self.config, &self.current_state)
    }

    pub fn is_terminal(&self) -> bool {
        fsm::is_terminal(&self.config, &self.current_state)
    }

    /// Attempt `current_state -> to_state`; `true` when the state advanced.
    pub fn try_transition(&mut self, to_state: &str, data: Record) -> bool {
        match self.transition(to_state, data) {
            Ok(_) => true,
            Err(rejection) => {
                warn!(to = to_state, reason = %rejection, "transition rejected");
                false
            }
        }
    }

    /// Attempt `current_state -> to_state` and report the details.
    pub fn transition(
        &mut self,
        to_state: &str,
        data: Record,
    ) -> Result<TransitionReport, TransitionRejection> {
        let span = info_span!(
            "transition",
            session_id = %self.session_id,
            from = %self.current_state,
            to = to_state
        );
        let _guard = span.enter();

        let from = self.current_state.clone();
        let transition = fsm::find_transition(&self.config, &from, to_state)
            .cloned()
            .ok_or_else(|| {
                error!("invalid transition");
                TransitionRejection::Illegal {
                    from: from.clone(),
                    to: to_state.to_string(),
                }
            })?;
        info!(agent_id = %transition.agent_id, "found valid transition");
        debug!(data = %safe_serialize(&data), "state data before validation");

        let mut data = data;
        let mut repair = Repair::NotAttempted;
        let missing = fsm::missing_fields(&self.config, to_state, &data);
        if !missing.is_empty() {
            warn!(missing = ?missing, "missing required fields");
            repair = self.backfill(&mut data, &missing, to_state);
            let still_missing = fsm::missing_fields(&self.config, to_state, &data);
            if !still_missing.is_empty() {
                error!(missing = ?still_missing, ?repair, "state data validation failed");
                return Err(TransitionRejection::MissingFields {
                    state: to_state.to_string(),
                    missing: still_missing,
                    repair,
                });
            }
        }
        info!("state data validation passed");

        let invoker = AgentInvoker::new(&self.config, &self.provider);
        let state_data = invoker.invoke(&transition.agent_id, &data)?;
        let status = Status::of_record(&state_data).unwrap_or(Status::Error);

        let advance = status != Status::Error || self.options.on_agent_error == AgentErrorPolicy::Advance;
        let next_state = if advance {
            to_state.to_string()
        } else {
            from.clone()
        };
        self.commit(next_state, state_data.clone())
            .map_err(TransitionRejection::Commit)?;

        if !advance {
            warn!(agent_id = %transition.agent_id, "agent reported error, state held");
            return Err(TransitionRejection::AgentFailed {
                agent_id: transition.agent_id,
                state: from,
                state_data,
            });
        }

        info!(?status, "state transition successful");
        Ok(TransitionReport {
            from,
            to: to_state.to_string(),
            agent_id: transition.agent_id,
            status,
            repair,
            state_data,
        })
    }

    /// Follow single outgoing transitions from the current state, feeding each
    /// step's output into the next, for at most `max_steps` transitions.
    #[instrument(skip(self, data), fields(session_id = %self.session_id))]
    pub fn run_pipeline(&mut self, data: Record, max_steps: usize) -> PipelineOutcome {
        let mut visited = Vec::new();
        let mut data = data;
        for _ in 0..max_steps {
            let target = match fsm::next_step(&self.config, &self.current_state) {
                NextStep::Terminal => {
                    return PipelineOutcome {
                        visited,
                        stop: PipelineStop::Terminal,
                    };
                }
                NextStep::FanOut(targets) => {
                    return PipelineOutcome {
                        visited,
                        stop: PipelineStop::FanOut(
                            targets.into_iter().map(str::to_string).collect(),
                        ),
                    };
                }
                NextStep::Next(transition) => transition.to_state.clone(),
            };
            match self.transition(&target, data) {
                Ok(report) => {
                    visited.push(report.to);
                    data = report.state_data;
                }
                Err(rejection) => {
                    return PipelineOutcome {
                        visited,
                        stop: PipelineStop::Rejected(rejection),
                    };
                }
            }
        }
        let stop = if self.is_terminal() {
            PipelineStop::Terminal
        } else {
            PipelineStop::StepLimit
        };
        PipelineOutcome { visited, stop }
    }

    /// Ask the formatter agent to supply `missing` fields; merges whatever
    /// structured output it returns into `data`.
    fn backfill(&self, data: &mut Record, missing: &[String], to_state: &str) -> Repair {
        let formatter = self.options.formatter_agent.as_str();
        if self.config.agent(formatter).is_none() {
            debug!(formatter, "no formatter agent declared, skipping repair");
            return Repair::NotAttempted;
        }

        let mut payload = Record::new();
        payload.insert("original_data".to_string(), Value::Object(data.clone()));
        payload.insert("missing_fields".to_string(), json!(missing));
        payload.insert("current_state".to_string(), json!(self.current_state));
        payload.insert("target_state".to_string(), json!(to_state));

        let invoker = AgentInvoker::new(&self.config, &self.provider);
        match invoker.dispatch(formatter, &payload) {
            Ok(Ok(AgentOutcome::Structured(output))) => {
                let cleaned = clean_content(&output);
                debug!(output = %safe_serialize(&cleaned), "formatter output cleaned");
                *data = apply_output(data, &cleaned);
            }
            Ok(Ok(AgentOutcome::Scalar(_))) => {
                error!(formatter, "formatter agent did not return a mapping");
            }
            Ok(Err(err)) => {
                error!(formatter, err = %format!("{err:#}"), "formatter agent failed");
            }
            Err(err) => {
                error!(err = %err, "formatter agent unavailable");
            }
        }
        Repair::Attempted
    }

    /// Move to `next_state` and persist; restore the previous state if the
    /// store rejects the write.
    fn commit(&mut self, next_state: String, state_data: Record) -> Result<(), StoreError> {
        let previous = std::mem::replace(&mut self.current_state, next_state);
        let expected_revision = self.base_revision;
        let state = SessionState {
            session_id: self.session_id.clone(),
            workflow: self.config.name.clone(),
            current_state: self.current_state.clone(),
            state_data,
            revision: expected_revision,
            updated_at: Some(Utc::now()),
        };
        match self.store.save(expected_revision, state) {
            Ok(saved) => {
                debug!(revision = saved.revision, "session committed");
                self.base_revision = saved.revision;
                self.session = Some(saved);
                Ok(())
            }
            Err(err) => {
                error!(err = %err, rollback_to = %previous, "session commit failed, rolling back");
                self.current_state = previous;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::session_store::MemorySessionStore;
    use crate::test_support::{
        FailingStore, Reply, ScriptedProvider, pipeline_config, project_data, record,
    };

    fn controller<'a>(
        provider: &'a ScriptedProvider,
        store: &'a MemorySessionStore,
    ) -> WorkflowController<&'a ScriptedProvider, &'a MemorySessionStore> {
        WorkflowController::new(
            pipeline_config(),
            "test-session",
            provider,
            store,
            ControllerOptions::default(),
        )
        .expect("controller")
    }

    #[test]
    fn starts_in_initial_state() {
        let provider = ScriptedProvider::new();
        let store = MemorySessionStore::new();
        let controller = controller(&provider, &store);
        assert_eq!(controller.current_state(), "init");
        assert!(controller.session().is_none());
        assert!(controller.state_data().is_empty());
        let targets: Vec<&str> = controller
            .valid_transitions()
            .iter()
            .map(|t| t.to_state.as_str())
            .collect();
        assert_eq!(targets, vec!["requirement"]);
        assert_eq!(controller.states().len(), 5);
        assert!(!controller.is_terminal());
    }

    #[test]
    fn illegal_transition_leaves_state_untouched() {
        let provider = ScriptedProvider::new();
        let store = MemorySessionStore::new();
        let mut controller = controller(&provider, &store);

        assert!(!controller.try_transition("testing", Record::new()));
        assert_eq!(controller.current_state(), "init");
        assert!(provider.calls().is_empty());
        assert!(store.load("test-session").expect("load").is_none());
    }

    #[test]
    fn missing_field_blocks_transition_without_formatter() {
        let mut config = pipeline_config();
        config.agents.retain(|agent| agent.id != "formatter");
        let provider = ScriptedProvider::new().reply("product_manager", Reply::content("ok"));
        let store = MemorySessionStore::new();
        let mut controller = WorkflowController::new(
            config,
            "test-session",
            &provider,
            &store,
            ControllerOptions::default(),
        )
        .expect("controller");

        let err = controller
            .transition("requirement", record(json!({"project_name": "X"})))
            .expect_err("should reject");
        assert!(matches!(
            &err,
            TransitionRejection::MissingFields { missing, repair: Repair::NotAttempted, .. }
                if missing == &vec!["project_description".to_string()]
        ));
        assert_eq!(controller.current_state(), "init");
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn formatter_that_cannot_help_still_blocks() {
        let provider = ScriptedProvider::new()
            .reply("formatter", Reply::structured(json!({"content": "sorry"})))
            .reply("product_manager", Reply::content("ok"));
        let store = MemorySessionStore::new();
        let mut controller = controller(&provider, &store);

        let err = controller
            .transition("requirement", record(json!({"project_name": "X"})))
            .expect_err("should reject");
        assert!(matches!(
            err,
            TransitionRejection::MissingFields { repair: Repair::Attempted, .. }
        ));
        assert_eq!(controller.current_state(), "init");
        let agents: Vec<String> = provider.calls().into_iter().map(|(id, _)| id).collect();
        assert_eq!(agents, vec!["formatter".to_string()]);
    }

    #[test]
    fn formatter_backfill_lets_transition_proceed() {
        let provider = ScriptedProvider::new()
            .reply(
                "formatter",
                Reply::structured(json!({"project_description": "filled in"})),
            )
            .reply("product_manager", Reply::content("ok"));
        let store = MemorySessionStore::new();
        let mut controller = controller(&provider, &store);

        let report = controller
            .transition("requirement", record(json!({"project_name": "X"})))
            .expect("transition");
        assert_eq!(report.repair, Repair::Attempted);
        assert_eq!(report.state_data["project_description"], "filled in");
        assert_eq!(controller.current_state(), "requirement");

        let calls = provider.calls();
        let formatter_payload: Value =
            serde_json::from_str(&calls[0].1.content).expect("formatter payload");
        assert_eq!(formatter_payload["missing_fields"], json!(["project_description"]));
        assert_eq!(formatter_payload["current_state"], "init");
        assert_eq!(formatter_payload["target_state"], "requirement");
        assert_eq!(formatter_payload["original_data"]["project_name"], "X");
    }

    #[test]
    fn complete_data_skips_formatter() {
        let provider = ScriptedProvider::new().reply("product_manager", Reply::content("ok"));
        let store = MemorySessionStore::new();
        let mut controller = controller(&provider, &store);

        let report = controller
            .transition("requirement", project_data())
            .expect("transition");
        assert_eq!(report.repair, Repair::NotAttempted);
        let agents: Vec<String> = provider.calls().into_iter().map(|(id, _)| id).collect();
        assert_eq!(agents, vec!["product_manager".to_string()]);
    }

    #[test]
    fn happy_path_commits_and_persists() {
        let provider = ScriptedProvider::new().reply("product_manager", Reply::content("ok"));
        let store = MemorySessionStore::new();
        let mut controller = controller(&provider, &store);

        assert!(controller.try_transition("requirement", project_data()));
        assert_eq!(controller.current_state(), "requirement");

        let stored = store.load("test-session").expect("load").expect("stored");
        assert_eq!(stored.current_state, "requirement");
        assert_eq!(stored.state_data["status"], "success");
        assert_eq!(stored.state_data["project_name"], "Test Project");
        assert_eq!(stored.workflow, "junior_developer");
        assert_eq!(stored.revision, 1);
        assert_eq!(controller.session(), Some(&stored));
    }

    #[test]
    fn agent_error_holds_state_by_default() {
        let provider = ScriptedProvider::new().reply("product_manager", Reply::fail("boom"));
        let store = MemorySessionStore::new();
        let mut controller = controller(&provider, &store);

        let err = controller
            .transition("requirement", project_data())
            .expect_err("should hold");
        assert!(matches!(err, TransitionRejection::AgentFailed { .. }));
        assert_eq!(controller.current_state(), "init");

        let stored = store.load("test-session").expect("load").expect("stored");
        assert_eq!(stored.current_state, "init");
        assert_eq!(stored.state_data["status"], "error");
        assert!(
            stored.state_data["content"]
                .as_str()
                .expect("error text")
                .contains("boom")
        );
    }

    #[test]
    fn agent_error_advances_when_configured() {
        let provider = ScriptedProvider::new().reply("product_manager", Reply::fail("boom"));
        let store = MemorySessionStore::new();
        let mut controller = WorkflowController::new(
            pipeline_config(),
            "test-session",
            &provider,
            &store,
            ControllerOptions {
                on_agent_error: AgentErrorPolicy::Advance,
                ..ControllerOptions::default()
            },
        )
        .expect("controller");

        let report = controller
            .transition("requirement", project_data())
            .expect("advance");
        assert_eq!(report.status, Status::Error);
        assert_eq!(controller.current_state(), "requirement");
    }

    #[test]
    fn failed_commit_rolls_back() {
        let provider = ScriptedProvider::new().reply("product_manager", Reply::content("ok"));
        let store = FailingStore;
        let mut controller = WorkflowController::new(
            pipeline_config(),
            "test-session",
            &provider,
            store,
            ControllerOptions::default(),
        )
        .expect("controller");

        let err = controller
            .transition("requirement", project_data())
            .expect_err("commit should fail");
        assert!(matches!(err, TransitionRejection::Commit(_)));
        assert_eq!(controller.current_state(), "init");
        assert!(controller.session().is_none());
        assert!(!controller.try_transition("requirement", project_data()));
    }

    #[test]
    fn stale_controller_cannot_overwrite_session() {
        let provider = ScriptedProvider::new()
            .reply("product_manager", Reply::content("ok"))
            .reply("tech_leader", Reply::structured(json!({"technical_design": "layered"})));
        let store = MemorySessionStore::new();
        let mut first = controller(&provider, &store);
        let mut second = controller(&provider, &store);

        assert!(first.try_transition("requirement", project_data()));
        let err = second
            .transition("requirement", project_data())
            .expect_err("stale write");
        assert!(matches!(
            err,
            TransitionRejection::Commit(StoreError::Conflict { .. })
        ));
        assert_eq!(second.current_state(), "init");
        assert_eq!(
            store
                .load("test-session")
                .expect("load")
                .expect("stored")
                .revision,
            1
        );
    }

    #[test]
    fn resumes_stored_session() {
        let provider = ScriptedProvider::new().reply("product_manager", Reply::content("ok"));
        let store = MemorySessionStore::new();
        {
            let mut first = controller(&provider, &store);
            assert!(first.try_transition("requirement", project_data()));
        }

        let resumed = controller(&provider, &store);
        assert_eq!(resumed.current_state(), "requirement");
        assert_eq!(resumed.state_data()["status"], "success");
    }

    #[test]
    fn ignores_session_of_another_workflow() {
        let provider = ScriptedProvider::new();
        let store = MemorySessionStore::new();
        store
            .save(
                0,
                SessionState {
                    session_id: "test-session".to_string(),
                    workflow: "other".to_string(),
                    current_state: "testing".to_string(),
                    state_data: record(json!({"project_name": "Foreign Project"})),
                    revision: 0,
                    updated_at: None,
                },
            )
            .expect("seed");

        let mut controller = controller(&provider, &store);
        assert_eq!(controller.current_state(), "init");
        assert!(controller.session().is_none());
        assert!(controller.state_data().is_empty());

        // The first commit replaces the foreign session at its stored revision.
        let provider_ok = ScriptedProvider::new().reply("product_manager", Reply::content("ok"));
        let mut fresh = WorkflowController::new(
            pipeline_config(),
            "test-session",
            &provider_ok,
            &store,
            ControllerOptions::default(),
        )
        .expect("controller");
        assert!(fresh.try_transition("requirement", project_data()));
        let stored = store.load("test-session").expect("load").expect("stored");
        assert_eq!(stored.workflow, "junior_developer");
        assert_eq!(stored.revision, 2);
        assert_eq!(stored.state_data["project_name"], "Test Project");
        // Still based on revision 1.
        assert!(!controller.try_transition("requirement", project_data()));
    }

    #[test]
    fn rejects_invalid_session_id() {
        let provider = ScriptedProvider::new();
        let store = MemorySessionStore::new();
        let result = WorkflowController::new(
            pipeline_config(),
            "../etc",
            &provider,
            &store,
            ControllerOptions::default(),
        );
        assert!(matches!(result, Err(StoreError::InvalidSessionId(_))));
    }
}
