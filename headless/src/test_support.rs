//! Test-only fakes and fixtures.
//!
//! Scripted implementations of [`Trigger`], [`Agent`] and [`RepoSync`] share
//! their recorded state behind `Arc<Mutex<_>>`, so a test can keep a clone
//! and inspect it after the scheduler takes ownership.

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::types::{ExecutionOutcome, Task, TaskResult};
use crate::io::agent::{Agent, ExecRequest};
use crate::io::git::{PullOutcome, RepoSync};
use crate::shutdown::ShutdownToken;
use crate::triggers::Trigger;
use crate::ui::Console;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory writer whose contents survive being moved into a [`Console`].
#[derive(Debug, Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.0)).to_string()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Console writing into buffers: `(console, stdout, stderr)`.
pub fn captured_console() -> (Console, SharedBuf, SharedBuf) {
    let out = SharedBuf::default();
    let err = SharedBuf::default();
    (Console::new(out.clone(), err.clone()), out, err)
}

#[derive(Debug, Default)]
struct TriggerState {
    queue: VecDeque<Task>,
    completed: Vec<TaskResult>,
    poll_error: Option<String>,
    started: bool,
    stopped: bool,
}

/// Trigger handing out a fixed list of tasks.
///
/// With a token attached, the token is cancelled once the queue is drained
/// so a full scheduler run terminates on its own.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTrigger {
    state: Arc<Mutex<TriggerState>>,
    token: Option<ShutdownToken>,
}

impl ScriptedTrigger {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TriggerState {
                queue: tasks.into(),
                ..TriggerState::default()
            })),
            token: None,
        }
    }

    pub fn with_token(mut self, token: ShutdownToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Fail the next poll with `message`.
    pub fn with_poll_error(self, message: &str) -> Self {
        lock(&self.state).poll_error = Some(message.to_string());
        self
    }

    pub fn completed(&self) -> Vec<TaskResult> {
        lock(&self.state).completed.clone()
    }

    pub fn started(&self) -> bool {
        lock(&self.state).started
    }

    pub fn stopped(&self) -> bool {
        lock(&self.state).stopped
    }
}

impl Trigger for ScriptedTrigger {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn next_task(&mut self) -> Result<Option<Task>> {
        let mut state = lock(&self.state);
        if let Some(message) = state.poll_error.take() {
            bail!("{message}");
        }
        let task = state.queue.pop_front();
        if state.queue.is_empty()
            && let Some(token) = &self.token
        {
            token.cancel();
        }
        Ok(task)
    }

    fn on_task_complete(&mut self, result: &TaskResult) -> Result<()> {
        lock(&self.state).completed.push(result.clone());
        Ok(())
    }

    fn on_startup(&mut self) -> Result<()> {
        lock(&self.state).started = true;
        Ok(())
    }

    fn on_shutdown(&mut self) -> Result<()> {
        lock(&self.state).stopped = true;
        Ok(())
    }
}

/// Agent returning predetermined outcomes in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAgent {
    outcomes: Arc<Mutex<VecDeque<ExecutionOutcome>>>,
    requests: Arc<Mutex<Vec<ExecRequest>>>,
}

impl ScriptedAgent {
    pub fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes.into())),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        lock(&self.requests).clone()
    }
}

impl Agent for ScriptedAgent {
    fn execute(&self, request: &ExecRequest) -> ExecutionOutcome {
        lock(&self.requests).push(request.clone());
        lock(&self.outcomes)
            .pop_front()
            .unwrap_or_else(|| ExecutionOutcome::failure("no scripted outcome left"))
    }
}

/// Calls observed by [`ScriptedRepo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoCall {
    Pull,
    Push,
    HasUnpushed,
    LatestCommitHash,
}

#[derive(Debug)]
struct RepoState {
    pull_fails: bool,
    push_ok: bool,
    unpushed: bool,
    hash: String,
    calls: Vec<RepoCall>,
}

/// Repository fake with configurable results.
#[derive(Debug, Clone)]
pub struct ScriptedRepo {
    state: Arc<Mutex<RepoState>>,
}

impl Default for ScriptedRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRepo {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RepoState {
                pull_fails: false,
                push_ok: true,
                unpushed: false,
                hash: "0000000".to_string(),
                calls: Vec::new(),
            })),
        }
    }

    pub fn with_pull_failure(self) -> Self {
        lock(&self.state).pull_fails = true;
        self
    }

    pub fn with_push_failure(self) -> Self {
        lock(&self.state).push_ok = false;
        self
    }

    pub fn with_unpushed(self, unpushed: bool) -> Self {
        lock(&self.state).unpushed = unpushed;
        self
    }

    pub fn with_hash(self, hash: &str) -> Self {
        lock(&self.state).hash = hash.to_string();
        self
    }

    pub fn calls(&self) -> Vec<RepoCall> {
        lock(&self.state).calls.clone()
    }
}

impl RepoSync for ScriptedRepo {
    fn pull(&self) -> Result<PullOutcome> {
        let mut state = lock(&self.state);
        state.calls.push(RepoCall::Pull);
        if state.pull_fails {
            return Err(anyhow!("scripted pull failure"));
        }
        Ok(PullOutcome::Pulled)
    }

    fn push(&self) -> bool {
        let mut state = lock(&self.state);
        state.calls.push(RepoCall::Push);
        if state.push_ok {
            state.unpushed = false;
        }
        state.push_ok
    }

    fn has_unpushed_commits(&self) -> bool {
        let mut state = lock(&self.state);
        state.calls.push(RepoCall::HasUnpushed);
        state.unpushed
    }

    fn latest_commit_hash(&self) -> String {
        let mut state = lock(&self.state);
        state.calls.push(RepoCall::LatestCommitHash);
        state.hash.clone()
    }
}

/// Run git in `dir`, failing on a non-zero exit.
pub fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// A bare remote with two independent clones.
pub struct GitFixture {
    _temp: TempDir,
    pub remote: PathBuf,
    pub primary: PathBuf,
    pub other: PathBuf,
}

impl GitFixture {
    /// Seed a repository with one commit, publish it as a bare remote and
    /// clone it twice.
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let seed = temp.path().join("seed");
        let remote = temp.path().join("remote.git");
        let primary = temp.path().join("primary");
        let other = temp.path().join("other");

        fs::create_dir_all(&seed).context("create seed dir")?;
        git(&seed, &["init", "--quiet"])?;
        configure_identity(&seed)?;
        fs::write(seed.join("README.md"), "seed\n").context("write README")?;
        git(&seed, &["add", "-A"])?;
        git(&seed, &["commit", "--quiet", "-m", "seed"])?;

        let root = temp.path();
        git(root, &["clone", "--quiet", "--bare", "seed", "remote.git"])?;
        for name in ["primary", "other"] {
            git(root, &["clone", "--quiet", "remote.git", name])?;
            configure_identity(&root.join(name))?;
        }

        Ok(Self {
            _temp: temp,
            remote,
            primary,
            other,
        })
    }

    /// Write `contents` to `file` in `clone` and commit it.
    pub fn commit(&self, clone: &Path, file: &str, contents: &str, message: &str) -> Result<()> {
        fs::write(clone.join(file), contents).with_context(|| format!("write {file}"))?;
        git(clone, &["add", "-A"])?;
        git(clone, &["commit", "--quiet", "-m", message])?;
        Ok(())
    }
}

fn configure_identity(dir: &Path) -> Result<()> {
    git(dir, &["config", "user.email", "test@example.com"])?;
    git(dir, &["config", "user.name", "Test"])?;
    git(dir, &["config", "commit.gpgsign", "false"])?;
    Ok(())
}

/// Write an executable shell script standing in for the agent binary.
#[cfg(unix)]
pub fn fake_agent(dir: &Path, body: &str) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-claude");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).context("write fake agent")?;
    let mut perms = fs::metadata(&path).context("stat fake agent")?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).context("chmod fake agent")?;
    Ok(path)
}
