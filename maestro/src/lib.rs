//! File-aware orchestration of a remote language model.
//!
//! The model steers a bounded loop: each reply names actions (read one file
//! from a sandboxed root, or finalize an HTML report), the orchestrator
//! executes them and sends the results back with the model's own memory.
//!
//! - **[`core`]**: Pure logic (response types, normalization, payloads, budget).
//! - **[`io`]**: Side effects (config files, HTTP transport, sandbox, console).
//!
//! [`start`] builds the run context, [`looping`] drives the model and
//! [`step`] executes one turn's actions.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod start;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
