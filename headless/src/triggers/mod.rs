//! Task sources.
//!
//! A [`Trigger`] hands tasks to the scheduler one at a time and is told the
//! result of each exactly once. The scheduler never learns where tasks come
//! from.

pub mod file;
pub mod github;
pub mod webhook;

use anyhow::Result;
use clap::ValueEnum;

use crate::core::types::{Task, TaskResult};

/// Abstraction over task sources.
pub trait Trigger {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Next task to run, or `None` when nothing is waiting.
    fn next_task(&mut self) -> Result<Option<Task>>;

    /// Record the result of a task previously returned by `next_task`.
    fn on_task_complete(&mut self, result: &TaskResult) -> Result<()>;

    /// Called once before the first poll. Errors abort startup.
    fn on_startup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once after the loop exits.
    fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Trigger selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TriggerKind {
    /// JSON task queue on disk.
    File,
    /// HTTP endpoint accepting tasks.
    Webhook,
    /// Labeled GitHub issues.
    Github,
}
