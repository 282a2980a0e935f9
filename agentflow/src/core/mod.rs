//! Deterministic, pure logic shared by the workflow controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod fsm;
pub mod invariants;
pub mod normalize;
pub mod state_data;
pub mod types;
pub mod workflow;
