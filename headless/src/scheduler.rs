//! The polling loop: poll, pull, execute, push, report.
//!
//! One task runs at a time. Every wait between steps goes through
//! [`sleep_with_countdown`] so a termination signal is honoured within one
//! tick, but an agent run in progress is never interrupted by it.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument, warn};

use crate::core::outcome::task_result;
use crate::core::types::{Task, TaskResult};
use crate::io::agent::{Agent, ExecRequest};
use crate::io::git::{PullOutcome, RepoSync};
use crate::shutdown::{DEFAULT_TICK, ShutdownToken, sleep_with_countdown};
use crate::triggers::Trigger;
use crate::ui::{self, Console};

/// Where the scheduler is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Startup,
    Polling,
    SyncPull,
    Executing,
    SyncPush,
    Reporting,
    ErrorBackoff,
    Shutdown,
}

/// Timing and presentation knobs for the loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Repository the agent works in.
    pub workdir: PathBuf,
    /// Agent wall-clock budget per task.
    pub timeout: Duration,
    /// Pause between polls and after each task.
    pub poll_interval: Duration,
    /// Pause after a cycle fails unexpectedly.
    pub error_backoff: Duration,
    /// Countdown granularity.
    pub tick: Duration,
    /// Redraw the countdown line while waiting.
    pub show_countdown: bool,
}

impl LoopSettings {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
            poll_interval: Duration::from_millis(10_000),
            error_backoff: Duration::from_millis(60_000),
            tick: DEFAULT_TICK,
            show_countdown: true,
        }
    }
}

/// What a single cycle accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The trigger had nothing to run.
    Idle,
    /// Pulling failed and could not be recovered; the task was not run.
    PullFailed { task_id: String },
    /// A task ran and its result was reported.
    Ran(TaskResult),
}

/// Summary of a scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopOutcome {
    pub tasks_run: u32,
    pub tasks_succeeded: u32,
    pub cycle_errors: u32,
}

/// Drives tasks from a [`Trigger`] through an [`Agent`], syncing with git
/// around each run.
pub struct Scheduler<T, A, R> {
    trigger: T,
    agent: A,
    repo: R,
    settings: LoopSettings,
    console: Console,
    token: ShutdownToken,
    phase: Phase,
}

impl<T: Trigger, A: Agent, R: RepoSync> Scheduler<T, A, R> {
    pub fn new(
        trigger: T,
        agent: A,
        repo: R,
        settings: LoopSettings,
        console: Console,
        token: ShutdownToken,
    ) -> Self {
        Self {
            trigger,
            agent,
            repo,
            settings,
            console,
            token,
            phase: Phase::Startup,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn trigger(&self) -> &T {
        &self.trigger
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// Only a failing startup hook is returned as an error; cycle errors
    /// are logged and followed by the error backoff.
    #[instrument(skip_all, fields(trigger = self.trigger.name()))]
    pub fn run(&mut self) -> Result<LoopOutcome> {
        self.startup()?;

        let mut outcome = LoopOutcome::default();
        while !self.token.is_cancelled() {
            match self.run_cycle() {
                Ok(CycleOutcome::Ran(result)) => {
                    outcome.tasks_run += 1;
                    if result.success {
                        outcome.tasks_succeeded += 1;
                    }
                    self.pause(Phase::Polling, self.settings.poll_interval);
                }
                Ok(CycleOutcome::Idle | CycleOutcome::PullFailed { .. }) => {
                    self.pause(Phase::Polling, self.settings.poll_interval);
                }
                Err(err) => {
                    outcome.cycle_errors += 1;
                    error!(err = %format!("{err:#}"), "cycle failed, backing off");
                    self.pause(Phase::ErrorBackoff, self.settings.error_backoff);
                }
            }
        }

        self.shutdown();
        info!(
            tasks_run = outcome.tasks_run,
            tasks_succeeded = outcome.tasks_succeeded,
            "scheduler stopped"
        );
        Ok(outcome)
    }

    fn startup(&mut self) -> Result<()> {
        self.phase = Phase::Startup;
        self.trigger
            .on_startup()
            .with_context(|| format!("start {} trigger", self.trigger.name()))?;

        if self.repo.has_unpushed_commits() {
            info!("pushing commits left over from a previous run");
            if !self.repo.push() {
                warn!("could not push leftover commits, will retry after the next task");
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.phase = Phase::Shutdown;
        self.console.clear_line();
        if let Err(err) = self.trigger.on_shutdown() {
            warn!(err = %format!("{err:#}"), "trigger shutdown hook failed");
        }
    }

    /// One poll-pull-execute-push-report pass.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome> {
        self.phase = Phase::Polling;
        let Some(task) = self.trigger.next_task().context("poll trigger")? else {
            debug!("no task available");
            return Ok(CycleOutcome::Idle);
        };
        info!(task_id = %task.id, "task received");

        self.phase = Phase::SyncPull;
        match self.repo.pull() {
            Ok(PullOutcome::Pulled) => {}
            Ok(PullOutcome::Recovered) => {
                warn!(task_id = %task.id, "local changes discarded to match remote");
            }
            Err(err) => {
                error!(task_id = %task.id, err = %format!("{err:#}"), "pull failed, skipping cycle");
                return Ok(CycleOutcome::PullFailed { task_id: task.id });
            }
        }

        let result = self.execute_task(&task);

        if result.success {
            self.phase = Phase::SyncPush;
            if self.repo.has_unpushed_commits() && !self.repo.push() {
                warn!(task_id = %task.id, "push failed, will retry on a later cycle");
            }
        }

        self.phase = Phase::Reporting;
        self.console
            .print(&ui::result_block(result.success, &result.ai_note));
        self.trigger
            .on_task_complete(&result)
            .with_context(|| format!("report result for {}", task.id))?;

        Ok(CycleOutcome::Ran(result))
    }

    fn execute_task(&mut self, task: &Task) -> TaskResult {
        self.phase = Phase::Executing;
        self.console.print(&ui::task_header(&task.id, &task.prompt));

        let request = ExecRequest {
            workdir: self.settings.workdir.clone(),
            prompt: task.prompt.clone(),
            timeout: self.settings.timeout,
        };
        let outcome = self.agent.execute(&request);
        let commit_hash = outcome
            .success
            .then(|| self.repo.latest_commit_hash());

        let result = task_result(&task.id, outcome, commit_hash);
        info!(task_id = %task.id, status = %result.status, "task finished");
        result
    }

    fn pause(&mut self, phase: Phase, duration: Duration) {
        self.phase = phase;
        let console = &self.console;
        let show = self.settings.show_countdown;
        sleep_with_countdown(duration, self.settings.tick, &self.token, |remaining| {
            if show {
                console.countdown(remaining);
            }
        });
        if show {
            console.clear_line();
        }
    }
}
