//! Agent abstraction and the Claude Code CLI backend.
//!
//! The [`Agent`] trait decouples the scheduler from the actual agent
//! process. Tests use scripted agents that return predetermined outcomes
//! without spawning anything.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::core::lines::LineBuffer;
use crate::core::outcome::{ProcessEnd, resolve_outcome};
use crate::core::stream::StreamParser;
use crate::core::types::ExecutionOutcome;
use crate::io::env::safe_environment;
use crate::io::process::{DEFAULT_KILL_GRACE, Limits, run_supervised};
use crate::ui::{AgentView, Console};

/// Command name used when no installed binary is found.
pub const AGENT_COMMAND: &str = "claude";

/// Flags selecting non-interactive, streaming, unattended operation.
pub const AGENT_FLAGS: &[&str] = &[
    "-p",
    "--output-format",
    "stream-json",
    "--verbose",
    "--dangerously-skip-permissions",
];

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Repository the agent works in.
    pub workdir: PathBuf,
    /// Prompt delivered on stdin.
    pub prompt: String,
    /// Wall-clock budget before termination starts.
    pub timeout: Duration,
}

/// Abstraction over agent execution backends.
pub trait Agent {
    /// Run the agent to completion. Failures are reported in the outcome.
    fn execute(&self, request: &ExecRequest) -> ExecutionOutcome;
}

/// Agent backed by the `claude` CLI.
#[derive(Clone)]
pub struct ClaudeAgent {
    binary: PathBuf,
    kill_grace: Duration,
    console: Console,
}

impl ClaudeAgent {
    pub fn new(binary: impl Into<PathBuf>, console: Console) -> Self {
        Self {
            binary: binary.into(),
            kill_grace: DEFAULT_KILL_GRACE,
            console,
        }
    }

    /// Override the time between SIGTERM and SIGKILL.
    pub fn with_kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, workdir: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(AGENT_FLAGS)
            .current_dir(workdir)
            .env_clear()
            .envs(safe_environment());
        cmd
    }
}

impl Agent for ClaudeAgent {
    #[instrument(skip_all, fields(binary = %self.binary.display(), timeout_secs = request.timeout.as_secs()))]
    fn execute(&self, request: &ExecRequest) -> ExecutionOutcome {
        info!(workdir = %request.workdir.display(), "starting agent");

        let mut parser = StreamParser::new();
        let mut view = AgentView::new();
        let mut diagnostics = LineBuffer::new();
        let console = &self.console;
        let limits = Limits {
            timeout: request.timeout,
            kill_grace: self.kill_grace,
        };

        let exit = run_supervised(
            self.command(&request.workdir),
            Some(request.prompt.as_bytes()),
            limits,
            |chunk| {
                for event in parser.feed(chunk) {
                    view.show(console, &event);
                }
            },
            |chunk| {
                if let Some(lines) = diagnostics.push(chunk) {
                    console.agent_diagnostic(&String::from_utf8_lossy(&lines));
                }
            },
        );

        let tail = diagnostics.take();
        if !tail.is_empty() {
            console.agent_diagnostic(&String::from_utf8_lossy(&tail));
        }

        let exit = match exit {
            Ok(exit) => exit,
            Err(err) => {
                error!(err = %format!("{err:#}"), "failed to run agent");
                return ExecutionOutcome::failure(format!("Failed to spawn agent: {err:#}"));
            }
        };

        for event in parser.flush() {
            view.show(console, &event);
        }
        view.flush(console);
        console.print("\n");

        let discarded = parser.discarded_lines();
        if discarded > 0 {
            debug!(discarded, "non-protocol lines discarded");
        }

        let end = if exit.timed_out() {
            warn!(termination = ?exit.termination, "agent timed out");
            ProcessEnd::TimedOut {
                timeout: request.timeout,
            }
        } else {
            ProcessEnd::Exited(exit.status.code())
        };

        let verdict = parser.into_verdict();
        if verdict.is_none() && end == ProcessEnd::Exited(Some(0)) {
            warn!("agent exited cleanly without a verdict, treating as success");
        }
        let outcome = resolve_outcome(verdict, end);
        info!(success = outcome.success, exit_code = ?exit.status.code(), "agent finished");
        outcome
    }
}

/// Locate the agent binary.
///
/// Order: the configured path if it exists, then well-known install
/// locations, then the bare command name for `PATH` lookup.
pub fn resolve_agent_binary(configured: Option<&Path>, home: Option<&Path>) -> PathBuf {
    if let Some(path) = configured
        && path.exists()
    {
        return path.to_path_buf();
    }
    if let Some(found) = install_candidates(home).into_iter().find(|p| p.exists()) {
        debug!(path = %found.display(), "found agent binary");
        return found;
    }
    PathBuf::from(AGENT_COMMAND)
}

fn install_candidates(home: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("/usr/local/bin/claude"),
        PathBuf::from("/usr/bin/claude"),
    ];
    if let Some(home) = home {
        candidates.push(home.join(".local/bin/claude"));
        candidates.push(home.join(".claude/bin/claude"));
        candidates.extend(nvm_candidates(home));
    }
    candidates
}

/// `~/.nvm/versions/node/*/bin/claude`, in lexical version order.
fn nvm_candidates(home: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(home.join(".nvm/versions/node")) else {
        return Vec::new();
    };
    let mut versions: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    versions.sort();
    versions
        .into_iter()
        .map(|version| version.join("bin/claude"))
        .collect()
}
