//! Finite-state orchestrator for multi-agent LLM workflows.
//!
//! A workflow is a declarative document naming agents, per-state required
//! fields, and the legal transitions between states. The controller validates
//! each requested transition, asks the bound agent to do the work, normalizes
//! what comes back, and commits the new state to a session store.
//!
//! - **[`core`]**: Pure, deterministic logic (transition table lookups,
//!   invariants, content normalization). No I/O.
//! - **[`io`]**: Side-effecting collaborators (workflow files, agent
//!   subprocesses, session storage). Behind traits so tests can script them.
//!
//! [`controller`] and [`invoker`] combine the two; [`session`] and
//! [`validate`] wire them up for the CLI.

pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod invoker;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
