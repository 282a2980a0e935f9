//! Stable exit codes for agentflow CLI commands.

/// Command succeeded; for `transition`, the state advanced.
pub const OK: i32 = 0;
/// Invalid workflow, settings, data file, session id, or any other error.
pub const INVALID: i32 = 1;
/// The workflow refused to advance (illegal edge, missing fields, agent error).
pub const REJECTED: i32 = 2;
