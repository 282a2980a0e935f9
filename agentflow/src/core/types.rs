//! Shared deterministic types for the workflow core.
//!
//! These types define the contracts between the controller, the invoker and
//! the agent collaborators. They carry no I/O and serialize stably.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form JSON mapping used for state data and agent output.
pub type Record = Map<String, Value>;

/// Outcome status stamped on state data after an agent task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Success,
    Error,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Success => "success",
            Status::Error => "error",
        }
    }

    /// Read the `status` key of a record. Unknown or missing values yield `None`.
    pub fn of_record(record: &Record) -> Option<Status> {
        match record.get("status").and_then(Value::as_str)? {
            "pending" => Some(Status::Pending),
            "success" => Some(Status::Success),
            "error" => Some(Status::Error),
            _ => None,
        }
    }
}

/// What an agent collaborator handed back, before normalization.
///
/// Collaborators either produce a JSON object or an opaque string. The
/// invoker normalizes both into a [`Record`] at its boundary, so nothing
/// deeper in the pipeline branches on the shape.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Structured(Record),
    Scalar(String),
}

impl AgentOutcome {
    /// Classify raw agent text: a JSON object is structured, anything else is scalar.
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(Value::Object(map)) => AgentOutcome::Structured(map),
            _ => AgentOutcome::Scalar(text.to_string()),
        }
    }
}

/// What the controller does when the delegated agent reports `status: error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentErrorPolicy {
    /// Persist the degraded data but keep `current_state` where it was.
    #[default]
    Hold,
    /// Advance anyway; the data records `status: error`.
    Advance,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_reads_known_values_only() {
        let record = json!({"status": "success"});
        assert_eq!(
            Status::of_record(record.as_object().expect("object")),
            Some(Status::Success)
        );
        let unknown = json!({"status": "done"});
        assert_eq!(Status::of_record(unknown.as_object().expect("object")), None);
        assert_eq!(Status::of_record(&Record::new()), None);
    }

    #[test]
    fn outcome_from_text_classifies_objects() {
        assert!(matches!(
            AgentOutcome::from_text("  {\"content\": \"ok\"}\n"),
            AgentOutcome::Structured(map) if map["content"] == "ok"
        ));
        assert_eq!(
            AgentOutcome::from_text("[1, 2]"),
            AgentOutcome::Scalar("[1, 2]".to_string())
        );
        assert_eq!(
            AgentOutcome::from_text("plain words"),
            AgentOutcome::Scalar("plain words".to_string())
        );
    }

    #[test]
    fn error_policy_parses_lowercase() {
        let policy: AgentErrorPolicy = serde_json::from_str("\"advance\"").expect("parse");
        assert_eq!(policy, AgentErrorPolicy::Advance);
        assert_eq!(AgentErrorPolicy::default(), AgentErrorPolicy::Hold);
    }
}
