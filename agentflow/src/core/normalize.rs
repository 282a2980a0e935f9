//! Content normalization for heterogeneous agent output.
//!
//! Agents return raw text, JSON smuggled inside strings, or structured
//! objects. Everything here is pure and total: no function panics or returns
//! an error, so callers can apply them at any boundary.

use std::fmt::Debug;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::core::state_data::STAGE_FIELDS;
use crate::core::types::{AgentOutcome, Record};

pub const CONTENT_KEY: &str = "content";

/// Normalize the `content` field of `record` into a mapping.
///
/// A string holding a JSON object is replaced by that object; any other
/// string becomes `{raw_content, format}`. Non-string content is left alone,
/// which makes the operation idempotent.
pub fn clean_content(record: &Record) -> Record {
    let mut result = record.clone();
    if let Some(Value::String(text)) = result.get(CONTENT_KEY) {
        let wrapped = wrap_text(text);
        result.insert(CONTENT_KEY.to_string(), wrapped);
    }
    result
}

/// Turn free text into a content mapping.
pub fn wrap_text(text: &str) -> Value {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return Value::Object(map);
    }
    let format = if text.contains('#') {
        "markdown"
    } else {
        "text"
    };
    json!({ "raw_content": text, "format": format })
}

/// Serialize to JSON text, falling back to the value's debug form.
///
/// Timestamps serialize as ISO-8601 through their `Serialize` impls.
pub fn safe_serialize<T: Serialize + Debug + ?Sized>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(text) => text,
        Err(err) => {
            warn!(err = %err, "serialization failed, using debug form");
            format!("{value:?}")
        }
    }
}

/// Parse JSON text; unparseable input comes back as `{raw_data: text}`.
pub fn safe_deserialize(text: &str) -> Value {
    match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            warn!(err = %err, "deserialization failed, keeping raw text");
            json!({ "raw_data": text })
        }
    }
}

/// Recursive merge: nested mappings merge key by key, anything else is
/// replaced by the value from `update`.
pub fn merge_content(base: &Record, update: &Record) -> Record {
    let mut result = base.clone();
    for (key, value) in update {
        let merged = match (result.get(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                Value::Object(merge_content(existing, incoming))
            }
            _ => value.clone(),
        };
        result.insert(key.clone(), merged);
    }
    result
}

/// Fold one agent's normalized output into the running state data.
///
/// `content` belongs to the agent that produced it and replaces the previous
/// stage's content whole; every other key merges like [`merge_content`].
pub fn apply_output(data: &Record, output: &Record) -> Record {
    let mut merged = merge_content(data, output);
    if let Some(content) = output.get(CONTENT_KEY) {
        merged.insert(CONTENT_KEY.to_string(), content.clone());
    }
    merged
}

/// True when every field in `required` is present. An empty slice checks `content`.
pub fn validate_structure(record: &Record, required: &[&str]) -> bool {
    if required.is_empty() {
        return record.contains_key(CONTENT_KEY);
    }
    required.iter().all(|field| record.contains_key(*field))
}

/// Normalize a collaborator outcome into a record with mapping content.
pub fn normalize_outcome(outcome: AgentOutcome) -> Record {
    match outcome {
        AgentOutcome::Structured(map) => {
            let mut cleaned = clean_content(&map);
            lift_stage_fields(&mut cleaned);
            cleaned
        }
        AgentOutcome::Scalar(text) => {
            let mut record = Record::new();
            record.insert(CONTENT_KEY.to_string(), wrap_text(&text));
            lift_stage_fields(&mut record);
            record
        }
    }
}

/// Copy pipeline stage fields found inside `content` up to the top level.
///
/// Agents often nest `technical_design` and friends in their content body;
/// the required-field check only looks at top-level keys.
pub fn lift_stage_fields(record: &mut Record) {
    let Some(Value::Object(content)) = record.get(CONTENT_KEY) else {
        return;
    };
    let lifted: Vec<(String, Value)> = STAGE_FIELDS
        .iter()
        .filter_map(|field| {
            content
                .get(*field)
                .map(|value| (field.to_string(), value.clone()))
        })
        .collect();
    for (field, value) in lifted {
        record.insert(field, value);
    }
}
