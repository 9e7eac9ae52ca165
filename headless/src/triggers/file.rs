//! Task queue kept in a JSON file.
//!
//! The file is re-read on every poll so tasks can be appended by hand or by
//! another process while the scheduler runs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::types::{Task, TaskResult};
use crate::triggers::Trigger;
use crate::ui::Console;

const SAMPLE_TASK_ID: &str = "example-1";
const SAMPLE_TASK_PROMPT: &str = "Add a comment to the main function explaining what it does";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileTaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One entry of the tasks file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTask {
    pub id: String,
    pub prompt: String,
    pub status: FileTaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl FileTask {
    pub fn pending(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            status: FileTaskStatus::Pending,
            result: None,
        }
    }
}

pub struct FileTrigger {
    path: PathBuf,
    console: Console,
}

impl FileTrigger {
    pub fn new(path: impl Into<PathBuf>, console: Console) -> Self {
        Self {
            path: path.into(),
            console,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Trigger for FileTrigger {
    fn name(&self) -> &'static str {
        "file"
    }

    fn next_task(&mut self) -> Result<Option<Task>> {
        let mut tasks = load_tasks(&self.path);
        let Some(entry) = tasks
            .iter_mut()
            .find(|t| t.status == FileTaskStatus::Pending)
        else {
            return Ok(None);
        };

        entry.status = FileTaskStatus::InProgress;
        let task = Task::new(entry.id.clone(), entry.prompt.clone());
        save_tasks(&self.path, &tasks)?;
        debug!(task_id = %task.id, "claimed task from file");
        Ok(Some(task))
    }

    fn on_task_complete(&mut self, result: &TaskResult) -> Result<()> {
        let mut tasks = load_tasks(&self.path);
        let Some(entry) = tasks.iter_mut().find(|t| t.id == result.task_id) else {
            warn!(task_id = %result.task_id, "completed task no longer in tasks file");
            return Ok(());
        };

        entry.status = if result.success {
            FileTaskStatus::Completed
        } else {
            FileTaskStatus::Failed
        };
        entry.result = Some(result.ai_note.clone());
        save_tasks(&self.path, &tasks)
    }

    fn on_startup(&mut self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        save_tasks(
            &self.path,
            &[FileTask::pending(SAMPLE_TASK_ID, SAMPLE_TASK_PROMPT)],
        )?;
        info!(path = %self.path.display(), "created sample tasks file");
        self.console.print(&format!(
            "Created sample tasks file: {}\nEdit this file to add your tasks.\n",
            self.path.display()
        ));
        Ok(())
    }
}

/// Read the tasks file. Missing or malformed files read as empty.
pub fn load_tasks(path: &Path) -> Vec<FileTask> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return Vec::new(),
    };
    match serde_json::from_str(&contents) {
        Ok(tasks) => tasks,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "tasks file is not valid JSON");
            Vec::new()
        }
    }
}

/// Atomically write the tasks file (temp file + rename).
pub fn save_tasks(path: &Path, tasks: &[FileTask]) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(tasks).context("serialize tasks")?;
    buf.push('\n');

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::test_support::captured_console;

    fn trigger(path: &Path) -> FileTrigger {
        let (console, _, _) = captured_console();
        FileTrigger::new(path, console)
    }

    fn result(task_id: &str, success: bool, note: &str) -> TaskResult {
        TaskResult {
            task_id: task_id.to_string(),
            success,
            status: if success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            },
            commit_hash: None,
            ai_note: note.to_string(),
            error: None,
        }
    }

    #[test]
    fn claims_first_pending_task_and_persists_it() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        let mut done = FileTask::pending("a", "first");
        done.status = FileTaskStatus::Completed;
        save_tasks(
            &path,
            &[done, FileTask::pending("b", "second"), FileTask::pending("c", "third")],
        )
        .expect("save");

        let mut trigger = trigger(&path);
        let task = trigger.next_task().expect("poll").expect("task");
        assert_eq!(task.id, "b");
        assert_eq!(task.prompt, "second");

        let stored = load_tasks(&path);
        assert_eq!(stored[1].status, FileTaskStatus::InProgress);
        assert_eq!(stored[2].status, FileTaskStatus::Pending);

        let next = trigger.next_task().expect("poll").expect("task");
        assert_eq!(next.id, "c");
        assert_eq!(trigger.next_task().expect("poll"), None);
    }

    #[test]
    fn completion_records_status_and_note() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        save_tasks(
            &path,
            &[FileTask::pending("ok", "x"), FileTask::pending("bad", "y")],
        )
        .expect("save");

        let mut trigger = trigger(&path);
        trigger
            .on_task_complete(&result("ok", true, "shipped"))
            .expect("complete");
        trigger
            .on_task_complete(&result("bad", false, "tests fail"))
            .expect("complete");
        trigger
            .on_task_complete(&result("ghost", true, "ignored"))
            .expect("unknown id is not an error");

        let stored = load_tasks(&path);
        assert_eq!(stored[0].status, FileTaskStatus::Completed);
        assert_eq!(stored[0].result.as_deref(), Some("shipped"));
        assert_eq!(stored[1].status, FileTaskStatus::Failed);
        assert_eq!(stored[1].result.as_deref(), Some("tests fail"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_or_malformed_file_yields_no_task() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        let mut trigger = trigger(&path);
        assert_eq!(trigger.next_task().expect("poll"), None);

        fs::write(&path, "{ not json").expect("write");
        assert_eq!(trigger.next_task().expect("poll"), None);
    }

    #[test]
    fn startup_creates_sample_file_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        let (console, out, _) = captured_console();
        let mut trigger = FileTrigger::new(&path, console);

        trigger.on_startup().expect("startup");
        let stored = load_tasks(&path);
        assert_eq!(stored, vec![FileTask::pending(SAMPLE_TASK_ID, SAMPLE_TASK_PROMPT)]);
        assert!(out.contents().contains("Created sample tasks file"));

        save_tasks(&path, &[]).expect("save");
        trigger.on_startup().expect("startup");
        assert!(load_tasks(&path).is_empty());
    }

    #[test]
    fn status_serializes_snake_case() {
        let mut task = FileTask::pending("t", "p");
        task.status = FileTaskStatus::InProgress;
        let json = serde_json::to_value(&task).expect("serialize");
        assert_eq!(json["status"], "in_progress");
        assert!(json.get("result").is_none());
    }
}
