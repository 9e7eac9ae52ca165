//! Stable exit codes for the `headless` CLI.

/// Command succeeded, or the scheduler shut down cleanly.
pub const OK: i32 = 0;
/// Invalid configuration, startup failure or other error.
pub const INVALID: i32 = 1;
/// `headless exec` ran the agent but the task did not succeed.
pub const TASK_FAILED: i32 = 3;
