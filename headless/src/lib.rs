//! Unattended runner for a headless coding agent.
//!
//! Tasks arrive from a [`triggers::Trigger`], the repository is pulled, the
//! agent runs under supervision with a minimal environment, its streamed
//! output is parsed for a verdict, and successful work is pushed before the
//! result is reported back to the trigger.
//!
//! - **[`core`]**: Pure, deterministic logic (sanitizer, stream parser,
//!   outcome classification). No I/O.
//! - **[`io`]**: Side-effecting operations (config, process supervision,
//!   agent invocation, git).
//! - **[`triggers`]**: Task sources (file queue, webhook, GitHub issues).
//!
//! [`scheduler`] ties them together; [`shutdown`] makes every wait
//! interruptible.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod scheduler;
pub mod shutdown;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod triggers;
pub mod ui;
