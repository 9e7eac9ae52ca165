//! Shared deterministic types for the task engine.
//!
//! These types define the contracts between the scheduler, the agent
//! supervisor and the trigger adapters. They carry no I/O.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of work handed to the engine by a trigger adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl Task {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Final classification of an attempted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Denied,
    NeedsInput,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Denied => "denied",
            TaskStatus::NeedsInput => "needs_input",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result reported to the trigger adapter, exactly once per executed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    pub ai_note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured verdict the agent embeds in its output,
/// e.g. `{"success": true, "aiNote": "done"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub success: bool,
    #[serde(default)]
    pub denied: bool,
    #[serde(default)]
    pub needs_input: bool,
    #[serde(default)]
    pub ai_note: Option<String>,
}

/// Outcome of one agent invocation as seen by the supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub denied: bool,
    pub needs_input: bool,
    pub ai_note: Option<String>,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn succeeded(ai_note: impl Into<String>) -> Self {
        Self {
            success: true,
            ai_note: Some(ai_note.into()),
            ..Self::default()
        }
    }
}

impl From<Verdict> for ExecutionOutcome {
    fn from(verdict: Verdict) -> Self {
        Self {
            success: verdict.success,
            denied: verdict.denied,
            needs_input: verdict.needs_input,
            ai_note: verdict.ai_note,
            error: None,
        }
    }
}
