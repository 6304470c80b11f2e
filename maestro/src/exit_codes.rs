//! Stable exit codes for the `maestro` CLI.

/// The loop finished: finalized, model done, or budget exhausted.
pub const OK: i32 = 0;
/// Invalid config, missing request file, or an I/O error.
pub const INVALID: i32 = 1;
/// The first model call failed after all retries.
pub const MODEL_UNAVAILABLE: i32 = 2;
