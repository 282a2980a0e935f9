//! Workflow definition loading with schema + invariant validation.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, error, instrument};

use crate::core::invariants::validate_workflow_invariants;
use crate::core::types::Record;
use crate::core::workflow::WorkflowConfig;

const WORKFLOW_SCHEMA: &str = include_str!("../../schemas/workflow.schema.json");
pub const WORKFLOW_SUFFIX: &str = ".workflow.json";

/// Top-level keys every workflow document must carry.
pub const REQUIRED_KEYS: [&str; 7] = [
    "name",
    "description",
    "input_file",
    "agents",
    "state_data",
    "initial_state",
    "transitions",
];

/// Failures while loading declarative configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("invalid config {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },
    #[error("read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(path: &Path, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// A validated workflow plus the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedWorkflow {
    pub config: WorkflowConfig,
    pub path: PathBuf,
}

impl LoadedWorkflow {
    /// Directory that relative paths inside the workflow resolve against.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn resolve(&self, relative: &Path) -> PathBuf {
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.base_dir().join(relative)
        }
    }

    /// Read the workflow's `input_file` as the initial state data.
    pub fn load_input(&self) -> Result<Record> {
        let path = self.resolve(&self.config.input_file);
        read_record(&path)
    }
}

/// Resolves workflow identifiers and loads their documents.
#[derive(Debug, Clone)]
pub struct WorkflowLoader {
    workflows_dir: PathBuf,
}

impl WorkflowLoader {
    pub fn new(workflows_dir: impl Into<PathBuf>) -> Self {
        Self {
            workflows_dir: workflows_dir.into(),
        }
    }

    /// Map a name (`junior_developer`) or a path (`./flows/x.json`) to a file.
    pub fn resolve(&self, identifier: &str) -> PathBuf {
        let looks_like_path = identifier.ends_with(".json")
            || identifier.contains('/')
            || identifier.contains('\\');
        if looks_like_path {
            PathBuf::from(identifier)
        } else {
            self.workflows_dir
                .join(format!("{identifier}{WORKFLOW_SUFFIX}"))
        }
    }

    #[instrument(skip(self))]
    pub fn load(&self, identifier: &str) -> Result<LoadedWorkflow, ConfigError> {
        let path = self.resolve(identifier);
        debug!(path = %path.display(), "loading workflow");
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                error!(path = %path.display(), "workflow config not found");
                return Err(ConfigError::NotFound { path });
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        let config = parse_workflow(&contents, &path).inspect_err(|err| {
            error!(err = %err, "workflow config rejected");
        })?;
        debug!(
            name = %config.name,
            agents = config.agents.len(),
            transitions = config.transitions.len(),
            "workflow loaded"
        );
        Ok(LoadedWorkflow { config, path })
    }
}

/// Parse and validate a workflow document: required keys, schema, invariants.
pub fn parse_workflow(contents: &str, path: &Path) -> Result<WorkflowConfig, ConfigError> {
    let value: Value = serde_json::from_str(contents)
        .map_err(|err| ConfigError::invalid(path, format!("malformed json: {err}")))?;
    let Some(object) = value.as_object() else {
        return Err(ConfigError::invalid(path, "expected a JSON object"));
    };

    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| !object.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(ConfigError::invalid(
            path,
            format!("missing required keys: {}", missing.join(", ")),
        ));
    }

    validate_schema(&value).map_err(|err| ConfigError::invalid(path, format!("{err:#}")))?;

    let config: WorkflowConfig = serde_json::from_value(value)
        .map_err(|err| ConfigError::invalid(path, format!("deserialize workflow: {err}")))?;

    let errors = validate_workflow_invariants(&config);
    if !errors.is_empty() {
        return Err(ConfigError::invalid(
            path,
            format!("invariant violations: {}", errors.join("; ")),
        ));
    }
    Ok(config)
}

/// Validate a workflow instance against the embedded JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(WORKFLOW_SCHEMA).context("parse workflow schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| anyhow!("compile workflow schema: {err}"))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Read a JSON document that must be an object.
pub fn read_record(path: &Path) -> Result<Record> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read input {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse input {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow!("input {} must be a JSON object", path.display())),
    }
}
