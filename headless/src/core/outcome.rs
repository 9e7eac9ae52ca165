//! Verdict resolution and task result classification.

use std::time::Duration;

use crate::core::types::{ExecutionOutcome, TaskResult, TaskStatus, Verdict};

/// Note used when the agent exits cleanly without a structured verdict.
pub const GENERIC_COMPLETION_NOTE: &str = "Task completed";

const DEFAULT_SUCCESS_NOTE: &str = "Task completed successfully";
const DEFAULT_FAILURE_NOTE: &str = "Task failed";

/// How the agent process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEnd {
    /// Exited on its own; `None` when terminated by a signal.
    Exited(Option<i32>),
    /// Exceeded its time budget and had to be stopped.
    TimedOut { timeout: Duration },
}

/// Combine the parsed verdict with the way the process ended.
///
/// A timeout always fails. Otherwise an extracted verdict wins; without one,
/// a non-zero exit fails and a zero exit is treated as a soft success.
pub fn resolve_outcome(verdict: Option<Verdict>, end: ProcessEnd) -> ExecutionOutcome {
    match (verdict, end) {
        (_, ProcessEnd::TimedOut { timeout }) => {
            ExecutionOutcome::failure(format!("Agent timed out after {}", human_duration(timeout)))
        }
        (Some(verdict), _) => verdict.into(),
        (None, ProcessEnd::Exited(Some(0))) => {
            ExecutionOutcome::succeeded(GENERIC_COMPLETION_NOTE)
        }
        (None, ProcessEnd::Exited(Some(code))) => {
            ExecutionOutcome::failure(format!("Agent exited with code {code}"))
        }
        (None, ProcessEnd::Exited(None)) => {
            ExecutionOutcome::failure("Agent was terminated by a signal")
        }
    }
}

/// Classify an execution outcome into the result reported for `task_id`.
pub fn task_result(
    task_id: &str,
    outcome: ExecutionOutcome,
    commit_hash: Option<String>,
) -> TaskResult {
    if outcome.success {
        return TaskResult {
            task_id: task_id.to_string(),
            success: true,
            status: TaskStatus::Completed,
            commit_hash,
            ai_note: outcome
                .ai_note
                .unwrap_or_else(|| DEFAULT_SUCCESS_NOTE.to_string()),
            error: None,
        };
    }

    let status = if outcome.denied {
        TaskStatus::Denied
    } else if outcome.needs_input {
        TaskStatus::NeedsInput
    } else {
        TaskStatus::Failed
    };
    let ai_note = outcome
        .ai_note
        .or_else(|| outcome.error.clone())
        .unwrap_or_else(|| DEFAULT_FAILURE_NOTE.to_string());

    TaskResult {
        task_id: task_id.to_string(),
        success: false,
        status,
        commit_hash: None,
        ai_note,
        error: outcome.error,
    }
}

fn human_duration(budget: Duration) -> String {
    if budget < Duration::from_secs(1) {
        return format!("{}ms", budget.as_millis());
    }
    // Partial seconds round up so the budget is never understated.
    let secs = budget.as_secs() + u64::from(budget.subsec_nanos() > 0);
    if secs >= 60 && secs % 60 == 0 {
        let mins = secs / 60;
        format!("{mins} minute{}", if mins == 1 { "" } else { "s" })
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(success: bool) -> Verdict {
        Verdict {
            success,
            denied: false,
            needs_input: false,
            ai_note: Some("note".to_string()),
        }
    }

    #[test]
    fn zero_exit_without_verdict_is_soft_success() {
        let outcome = resolve_outcome(None, ProcessEnd::Exited(Some(0)));
        assert!(outcome.success);
        assert_eq!(outcome.ai_note.as_deref(), Some(GENERIC_COMPLETION_NOTE));
    }

    #[test]
    fn nonzero_exit_without_verdict_names_exit_code() {
        let outcome = resolve_outcome(None, ProcessEnd::Exited(Some(2)));
        assert!(!outcome.success);
        assert!(outcome.error.expect("error").contains("code 2"));
    }

    #[test]
    fn verdict_overrides_exit_code() {
        let outcome = resolve_outcome(Some(verdict(true)), ProcessEnd::Exited(Some(1)));
        assert!(outcome.success);
        let outcome = resolve_outcome(Some(verdict(false)), ProcessEnd::Exited(Some(0)));
        assert!(!outcome.success);
        assert_eq!(outcome.ai_note.as_deref(), Some("note"));
    }

    #[test]
    fn timeout_fails_even_with_verdict() {
        let outcome = resolve_outcome(
            Some(verdict(true)),
            ProcessEnd::TimedOut {
                timeout: Duration::from_secs(60),
            },
        );
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Agent timed out after 1 minute"));
    }

    #[test]
    fn short_timeouts_name_their_real_budget() {
        let timed_out = |timeout| resolve_outcome(None, ProcessEnd::TimedOut { timeout }).error;
        assert_eq!(
            timed_out(Duration::from_millis(300)).as_deref(),
            Some("Agent timed out after 300ms")
        );
        assert_eq!(
            timed_out(Duration::from_millis(1_500)).as_deref(),
            Some("Agent timed out after 2s")
        );
        assert_eq!(
            timed_out(Duration::from_secs(90)).as_deref(),
            Some("Agent timed out after 90s")
        );
    }

    #[test]
    fn failure_status_prefers_denied_over_needs_input() {
        let outcome = ExecutionOutcome {
            success: false,
            denied: true,
            needs_input: true,
            ai_note: None,
            error: None,
        };
        let result = task_result("t", outcome, None);
        assert_eq!(result.status, TaskStatus::Denied);
        assert_eq!(result.ai_note, "Task failed");
    }

    #[test]
    fn needs_input_and_plain_failure_statuses() {
        let needs_input = ExecutionOutcome {
            needs_input: true,
            ai_note: Some("which db?".to_string()),
            ..ExecutionOutcome::default()
        };
        let result = task_result("t", needs_input, None);
        assert_eq!(result.status, TaskStatus::NeedsInput);
        assert_eq!(result.ai_note, "which db?");

        let result = task_result("t", ExecutionOutcome::failure("boom"), Some("abc".into()));
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.ai_note, "boom");
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.commit_hash, None);
    }

    #[test]
    fn success_carries_commit_hash_and_default_note() {
        let outcome = ExecutionOutcome {
            success: true,
            ..ExecutionOutcome::default()
        };
        let result = task_result("t", outcome, Some("abc1234".to_string()));
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.commit_hash.as_deref(), Some("abc1234"));
        assert_eq!(result.ai_note, "Task completed successfully");
    }
}
