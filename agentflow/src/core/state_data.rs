//! Typed view of the state-data payload that flows through a workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::normalize::wrap_text;
use crate::core::types::{Record, Status};

/// Optional fields filled in by later pipeline stages.
pub const STAGE_FIELDS: [&str; 6] = [
    "technical_design",
    "implementation_plan",
    "code_complete",
    "unit_tests",
    "test_results",
    "bug_report",
];

/// Agent-facing content: structured, or raw text awaiting normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Structured(Record),
    Raw(String),
}

/// State data for one workflow run.
///
/// Keys outside the known set are kept in `extra` so that agent output
/// survives a round trip through this type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStateData {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub project_description: String,
    #[serde(default)]
    pub user_stories: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub metadata: Record,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_design: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation_plan: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_tests: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bug_report: Option<Value>,

    #[serde(flatten)]
    pub extra: Record,
}

impl WorkflowStateData {
    pub fn from_record(record: Record) -> serde_json::Result<Self> {
        serde_json::from_value(Value::Object(record))
    }

    /// Replace raw string content with its normalized mapping.
    pub fn normalize(&mut self) {
        if let Some(Content::Raw(text)) = &self.content {
            let normalized = match wrap_text(text) {
                Value::Object(map) => map,
                _ => Record::new(),
            };
            self.content = Some(Content::Structured(normalized));
        }
    }

    /// Short label for the content: its `format` when it has one.
    pub fn content_kind(&self) -> &str {
        match &self.content {
            None => "none",
            Some(Content::Raw(_)) => "raw",
            Some(Content::Structured(map)) => map
                .get("format")
                .and_then(Value::as_str)
                .unwrap_or("structured"),
        }
    }
}
