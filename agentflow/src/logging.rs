//! Diagnostic tracing for the orchestrator.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: transition and agent diagnostics via
//!   `RUST_LOG`, written to stderr. Not persisted.
//!
//! - **Session files (`io/session_store`)**: the durable record of each
//!   session under `sessions_dir`. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=agentflow=debug agentflow transition junior_developer requirement --session demo
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
