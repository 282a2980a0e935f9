//! Agent profiles (`*.agent.json`) referenced by workflow agent declarations.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::io::workflow_loader::ConfigError;

const REQUIRED_KEYS: [&str; 3] = ["name", "description", "model"];

/// Persona and backend settings for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
    pub model: ModelSpec,
    /// Overrides the runner's default agent command for this agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

/// Load and validate an agent profile.
pub fn load_profile(path: &Path) -> Result<AgentProfile, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    parse_profile(&contents, path)
}

pub fn parse_profile(contents: &str, path: &Path) -> Result<AgentProfile, ConfigError> {
    let value: Value = serde_json::from_str(contents)
        .map_err(|err| ConfigError::invalid(path, format!("malformed json: {err}")))?;
    let Some(object) = value.as_object() else {
        return Err(ConfigError::invalid(path, "expected a JSON object"));
    };
    for key in REQUIRED_KEYS {
        if !object.contains_key(key) {
            return Err(ConfigError::invalid(path, format!("missing required key '{key}'")));
        }
    }
    let model = &object["model"];
    if model.get("type").is_none() || model.get("name").is_none() {
        return Err(ConfigError::invalid(path, "model requires 'type' and 'name'"));
    }

    let profile: AgentProfile = serde_json::from_value(value)
        .map_err(|err| ConfigError::invalid(path, format!("deserialize profile: {err}")))?;
    if let Some(command) = &profile.command
        && command.first().is_none_or(|program| program.trim().is_empty())
    {
        return Err(ConfigError::invalid(path, "command must be a non-empty array"));
    }
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT_MANAGER: &str = r#"{
        "name": "Product Manager",
        "description": "Turns a project brief into requirements",
        "role": "product manager",
        "instructions": ["Write user stories", "List acceptance criteria"],
        "model": {"type": "bedrock", "name": "anthropic.claude-instant-v1"}
    }"#;

    #[test]
    fn parses_complete_profile() {
        let profile = parse_profile(PRODUCT_MANAGER, Path::new("pm.agent.json")).expect("parse");
        assert_eq!(profile.name, "Product Manager");
        assert_eq!(profile.model.kind, "bedrock");
        assert_eq!(profile.instructions.len(), 2);
        assert!(profile.command.is_none());
    }

    #[test]
    fn missing_model_fields_are_invalid() {
        let err = parse_profile(
            r#"{"name": "a", "description": "b", "model": {"type": "bedrock"}}"#,
            Path::new("a.agent.json"),
        )
        .expect_err("should fail");
        assert!(err.to_string().contains("model requires"));

        let err = parse_profile(r#"{"name": "a", "model": {}}"#, Path::new("a.agent.json"))
            .expect_err("should fail");
        assert!(err.to_string().contains("missing required key 'description'"));
    }

    #[test]
    fn empty_command_is_invalid() {
        let err = parse_profile(
            r#"{"name": "a", "description": "b", "model": {"type": "t", "name": "n"}, "command": []}"#,
            Path::new("a.agent.json"),
        )
        .expect_err("should fail");
        assert!(err.to_string().contains("command must be"));
    }

    #[test]
    fn missing_profile_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_profile(&temp.path().join("ghost.agent.json")).expect_err("fail");
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }
}
