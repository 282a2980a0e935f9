//! Test-only helpers: a small pipeline workflow and scripted agents.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use serde_json::{Value, json};

use crate::core::types::{AgentOutcome, Record};
use crate::core::workflow::{AgentDef, StateRequirements, Transition, WorkflowConfig};
use crate::io::agent::{Agent, AgentProvider, AgentRequest};
use crate::io::config::Settings;
use crate::io::session_store::{SessionState, SessionStore, StoreError};

/// Agent declaration with a conventional profile path.
pub fn agent(id: &str) -> AgentDef {
    AgentDef {
        id: id.to_string(),
        config_path: PathBuf::from(format!("agents/{id}.agent.json")),
    }
}

pub fn edge(from: &str, to: &str, agent_id: &str) -> Transition {
    Transition {
        from_state: from.to_string(),
        to_state: to.to_string(),
        agent_id: agent_id.to_string(),
    }
}

fn requires(fields: &[&str]) -> StateRequirements {
    StateRequirements {
        required_fields: fields.iter().map(|f| f.to_string()).collect(),
    }
}

/// `init -> requirement -> technical -> development -> testing`, one agent per
/// edge plus a `formatter`.
pub fn pipeline_config() -> WorkflowConfig {
    let mut state_data = BTreeMap::new();
    state_data.insert(
        "requirement".to_string(),
        requires(&["project_name", "project_description"]),
    );
    state_data.insert("technical".to_string(), requires(&["user_stories"]));
    state_data.insert("development".to_string(), requires(&["technical_design"]));
    state_data.insert("testing".to_string(), requires(&[]));

    WorkflowConfig {
        name: "junior_developer".to_string(),
        description: "Requirements through testing for a small project".to_string(),
        input_file: PathBuf::from("junior_developer.input.json"),
        agents: ["product_manager", "tech_leader", "engineer", "qa_engineer", "formatter"]
            .into_iter()
            .map(agent)
            .collect(),
        state_data,
        initial_state: "init".to_string(),
        transitions: vec![
            edge("init", "requirement", "product_manager"),
            edge("requirement", "technical", "tech_leader"),
            edge("technical", "development", "engineer"),
            edge("development", "testing", "qa_engineer"),
        ],
    }
}

/// Convert a `json!` object literal into a record.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Input that satisfies the `requirement` state.
pub fn project_data() -> Record {
    record(json!({
        "project_name": "Test Project",
        "project_description": "A test project for workflow validation",
        "requirements": ["Feature 1", "Feature 2"]
    }))
}

/// Lay out `pipeline_config()` under `root/workflows`: the workflow document,
/// its input file and one profile per agent running `command`.
///
/// Returns settings pointing at that layout with sessions under
/// `root/sessions`.
pub fn write_workflow_fixture(root: &Path, command: &[&str]) -> Result<Settings> {
    let workflows_dir = root.join("workflows");
    let config = pipeline_config();
    fs::create_dir_all(workflows_dir.join("agents"))?;

    let workflow = serde_json::to_string_pretty(&config)?;
    fs::write(workflows_dir.join("junior_developer.workflow.json"), workflow)?;
    let input = serde_json::to_string_pretty(&project_data())?;
    fs::write(workflows_dir.join(&config.input_file), input)?;

    for def in &config.agents {
        let profile = json!({
            "name": def.id,
            "description": format!("{} for tests", def.id),
            "model": {"type": "local", "name": "scripted"},
            "command": command,
        });
        fs::write(
            workflows_dir.join(&def.config_path),
            serde_json::to_string_pretty(&profile)?,
        )?;
    }

    let mut settings = Settings {
        workflows_dir,
        sessions_dir: root.join("sessions"),
        ..Settings::default()
    };
    settings.agent.command = command.iter().map(|part| part.to_string()).collect();
    settings.agent.timeout_secs = 10;
    Ok(settings)
}

/// What a scripted agent does when called.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Return this JSON object.
    Structured(Value),
    /// Return plain text.
    Scalar(String),
    /// Fail while running.
    Fail(String),
    /// Fail while being built.
    Unbuildable(String),
}

impl Reply {
    pub fn structured(value: Value) -> Self {
        Self::Structured(value)
    }

    /// Shorthand for `{"content": text}`.
    pub fn content(text: &str) -> Self {
        Self::Structured(json!({ "content": text }))
    }

    pub fn scalar(text: &str) -> Self {
        Self::Scalar(text.to_string())
    }

    pub fn fail(message: &str) -> Self {
        Self::Fail(message.to_string())
    }

    pub fn unbuildable(message: &str) -> Self {
        Self::Unbuildable(message.to_string())
    }
}

/// Provider whose agents answer from a script and record every request.
///
/// Replies for one agent are consumed in order; the last one repeats. Agents
/// without a script fail when run.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    replies: HashMap<String, Vec<Reply>>,
    calls: RefCell<Vec<(String, AgentRequest)>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, agent_id: &str, reply: Reply) -> Self {
        self.replies
            .entry(agent_id.to_string())
            .or_default()
            .push(reply);
        self
    }

    /// `(agent_id, request)` for every run, in call order.
    pub fn calls(&self) -> Vec<(String, AgentRequest)> {
        self.calls.borrow().clone()
    }

    fn next_reply(&self, agent_id: &str) -> Option<Reply> {
        let script = self.replies.get(agent_id)?;
        let made = self
            .calls
            .borrow()
            .iter()
            .filter(|(id, _)| id == agent_id)
            .count();
        script.get(made.min(script.len() - 1)).cloned()
    }
}

impl AgentProvider for ScriptedProvider {
    fn agent(&self, def: &AgentDef) -> Result<Box<dyn Agent + '_>> {
        let reply = self.next_reply(&def.id);
        if let Some(Reply::Unbuildable(message)) = &reply {
            bail!("build agent '{}': {message}", def.id);
        }
        Ok(Box::new(ScriptedAgent {
            provider: self,
            id: def.id.clone(),
            reply,
        }))
    }
}

struct ScriptedAgent<'a> {
    provider: &'a ScriptedProvider,
    id: String,
    reply: Option<Reply>,
}

impl Agent for ScriptedAgent<'_> {
    fn run(&self, request: &AgentRequest) -> Result<AgentOutcome> {
        self.provider
            .calls
            .borrow_mut()
            .push((self.id.clone(), request.clone()));
        match &self.reply {
            Some(Reply::Structured(Value::Object(map))) => Ok(AgentOutcome::Structured(map.clone())),
            Some(Reply::Structured(other)) => Ok(AgentOutcome::Scalar(other.to_string())),
            Some(Reply::Scalar(text)) => Ok(AgentOutcome::Scalar(text.clone())),
            Some(Reply::Fail(message) | Reply::Unbuildable(message)) => Err(anyhow!("{message}")),
            None => Err(anyhow!("no scripted reply for agent '{}'", self.id)),
        }
    }
}

/// Store that has nothing and refuses every write.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

impl SessionStore for FailingStore {
    fn load(&self, _session_id: &str) -> Result<Option<SessionState>, StoreError> {
        Ok(None)
    }

    fn save(
        &self,
        _expected_revision: u64,
        _state: SessionState,
    ) -> Result<SessionState, StoreError> {
        Err(StoreError::Io(anyhow!("disk full")))
    }
}
