//! Runner settings stored under `.agentflow/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::types::AgentErrorPolicy;

/// Runner settings (TOML).
///
/// Edited by humans; every field has a default so a missing or partial file
/// still loads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Directory searched when a workflow is named instead of given by path.
    pub workflows_dir: PathBuf,

    /// Directory holding one `<session_id>.json` per session.
    pub sessions_dir: PathBuf,

    /// Agent id used to backfill missing required fields.
    pub formatter_agent: String,

    /// Whether an agent-reported error still advances the workflow.
    pub on_agent_error: AgentErrorPolicy,

    pub agent: AgentSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentSettings {
    /// Command that receives the rendered prompt on stdin (e.g. `["codex","exec","-"]`).
    pub command: Vec<String>,

    /// Wall-clock limit for a single agent call in seconds.
    pub timeout_secs: u64,

    /// Truncate agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "-".to_string(),
            ],
            timeout_secs: 10 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workflows_dir: PathBuf::from("config/workflows"),
            sessions_dir: PathBuf::from(".agentflow/sessions"),
            formatter_agent: "formatter".to_string(),
            on_agent_error: AgentErrorPolicy::default(),
            agent: AgentSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.formatter_agent.trim().is_empty() {
            return Err(anyhow!("formatter_agent must be non-empty"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        Ok(())
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `Settings::default()`.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let settings = Settings::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    settings.validate()?;
    let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
    buf.push('\n');
    crate::io::write_atomic(path, &buf)
}

/// Write default settings to `path` unless a file is already there.
///
/// Returns `true` when the file was written. `force` overwrites.
pub fn init_settings(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        debug!(path = %path.display(), "settings already present");
        return Ok(false);
    }
    write_settings(path, &Settings::default())?;
    info!(path = %path.display(), "wrote default settings");
    Ok(true)
}
