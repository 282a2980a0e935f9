//! Agent backend that pipes a rendered prompt into an external command.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use tracing::{debug, info, instrument, warn};

use crate::core::types::AgentOutcome;
use crate::core::workflow::AgentDef;
use crate::io::agent::{Agent, AgentProvider, AgentRequest};
use crate::io::config::AgentSettings;
use crate::io::process::run_command_with_timeout;
use crate::io::profile::{AgentProfile, load_profile};

const AGENT_TEMPLATE: &str = include_str!("prompts/agent.md");

/// Builds [`CommandAgent`]s from agent profiles on disk.
#[derive(Debug, Clone)]
pub struct CommandAgentProvider {
    /// Directory that relative `config_path`s resolve against.
    base_dir: PathBuf,
    settings: AgentSettings,
}

impl CommandAgentProvider {
    pub fn new(base_dir: impl Into<PathBuf>, settings: AgentSettings) -> Self {
        Self {
            base_dir: base_dir.into(),
            settings,
        }
    }
}

impl AgentProvider for CommandAgentProvider {
    fn agent(&self, def: &AgentDef) -> Result<Box<dyn Agent + '_>> {
        let path = if def.config_path.is_absolute() {
            def.config_path.clone()
        } else {
            self.base_dir.join(&def.config_path)
        };
        let profile =
            load_profile(&path).with_context(|| format!("load profile for agent '{}'", def.id))?;
        let command = profile
            .command
            .clone()
            .unwrap_or_else(|| self.settings.command.clone());
        Ok(Box::new(CommandAgent {
            id: def.id.clone(),
            profile,
            command,
            timeout: Duration::from_secs(self.settings.timeout_secs),
            output_limit_bytes: self.settings.output_limit_bytes,
        }))
    }
}

/// Agent that runs one command per request with the prompt on stdin.
///
/// Stdout holding a JSON object is a structured outcome; any other stdout is
/// returned verbatim as a scalar.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    id: String,
    profile: AgentProfile,
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandAgent {
    pub fn render_prompt(&self, request: &AgentRequest) -> Result<String> {
        let mut env = Environment::new();
        env.add_template("agent", AGENT_TEMPLATE)
            .context("load agent prompt template")?;
        let template = env.get_template("agent")?;
        let rendered = template
            .render(context! {
                name => self.profile.name,
                role => self.profile.role,
                description => self.profile.description,
                instructions => self.profile.instructions,
                message_role => request.role,
                content => request.content,
            })
            .context("render agent prompt")?;
        Ok(rendered)
    }
}

impl Agent for CommandAgent {
    #[instrument(skip_all, fields(agent_id = %self.id, timeout_secs = self.timeout.as_secs()))]
    fn run(&self, request: &AgentRequest) -> Result<AgentOutcome> {
        let prompt = self.render_prompt(request)?;
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent '{}' has an empty command", self.id))?;
        info!(program = %program, model = %self.profile.model.name, "starting agent command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("AGENTFLOW_AGENT_ID", &self.id)
            .env("AGENTFLOW_MODEL_TYPE", &self.profile.model.kind)
            .env("AGENTFLOW_MODEL", &self.profile.model.name);
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run agent '{}'", self.id))?;

        if output.timed_out {
            warn!("agent command timed out");
            return Err(anyhow!(
                "agent '{}' timed out after {:?}",
                self.id,
                self.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent command failed");
            return Err(anyhow!(
                "agent '{}' failed with status {:?}: {}",
                self.id,
                output.status.code(),
                output.stderr_tail(500)
            ));
        }

        let stdout = output.stdout_text();
        debug!(bytes = stdout.len(), "agent command completed");
        Ok(AgentOutcome::from_text(stdout.trim()))
    }
}
