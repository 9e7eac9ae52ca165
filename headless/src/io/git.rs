//! Git adapter keeping the working repository in sync with its remote.
//!
//! Every operation shells out to `git` in the project directory. Failures are
//! reported through return values; nothing here panics or leaves a rebase in
//! progress.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

/// Returned by [`RepoSync::latest_commit_hash`] when HEAD cannot be read.
pub const UNKNOWN_COMMIT: &str = "unknown";

/// Captured result of one git invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// How a successful pull was achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Rebase pull applied cleanly.
    Pulled,
    /// Pull failed; local state was discarded and reset to the remote.
    Recovered,
}

/// Remote synchronization used by the scheduler.
pub trait RepoSync {
    /// Bring the working tree up to date with the remote.
    ///
    /// Errors only when both the pull and the recovery reset failed.
    fn pull(&self) -> Result<PullOutcome>;
    /// Push local commits. Returns whether the push succeeded.
    fn push(&self) -> bool;
    /// True when the branch has commits its upstream lacks.
    fn has_unpushed_commits(&self) -> bool;
    /// Short hash of HEAD, or [`UNKNOWN_COMMIT`].
    fn latest_commit_hash(&self) -> String;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Run git with `args`. A spawn failure is reported as exit code 1.
    pub fn run(&self, args: &[&str]) -> GitOutcome {
        debug!(args = %args.join(" "), "running git");
        match Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
        {
            Ok(output) => GitOutcome {
                exit_code: output.status.code().unwrap_or(1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
            Err(err) => GitOutcome {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("spawn git {}: {err}", args.join(" ")),
            },
        }
    }

    /// Abandon local state and hard-reset onto the remote tip.
    fn recover(&self) -> Result<()> {
        // No rebase in progress is the common case here.
        let _ = self.run(&["rebase", "--abort"]);

        let fetch = self.run(&["fetch", "origin"]);
        if !fetch.success() {
            return Err(anyhow!("git fetch origin failed: {}", fetch.stderr.trim()));
        }
        let reset = self.run(&["reset", "--hard", "origin/HEAD"]);
        if !reset.success() {
            return Err(anyhow!(
                "git reset --hard origin/HEAD failed: {}",
                reset.stderr.trim()
            ));
        }
        Ok(())
    }
}

impl RepoSync for Git {
    #[instrument(skip_all)]
    fn pull(&self) -> Result<PullOutcome> {
        let pull = self.run(&["pull", "--rebase", "origin", "HEAD"]);
        if pull.success() {
            debug!("pull succeeded");
            return Ok(PullOutcome::Pulled);
        }

        warn!(stderr = %pull.stderr.trim(), "pull failed, resetting to remote");
        self.recover()
            .map_err(|err| err.context(format!("pull failed: {}", pull.stderr.trim())))?;
        info!("recovered by resetting to remote");
        Ok(PullOutcome::Recovered)
    }

    #[instrument(skip_all)]
    fn push(&self) -> bool {
        let push = self.run(&["push", "origin", "HEAD"]);
        if push.success() {
            info!("pushed to remote");
            true
        } else {
            warn!(stderr = %push.stderr.trim(), "push failed");
            false
        }
    }

    fn has_unpushed_commits(&self) -> bool {
        let log = self.run(&["log", "@{u}..HEAD", "--oneline"]);
        log.success() && !log.stdout.trim().is_empty()
    }

    fn latest_commit_hash(&self) -> String {
        let rev = self.run(&["rev-parse", "--short", "HEAD"]);
        let hash = rev.stdout.trim();
        if rev.success() && !hash.is_empty() {
            hash.to_string()
        } else {
            UNKNOWN_COMMIT.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outside_a_repository_everything_degrades_quietly() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());

        assert!(!git.has_unpushed_commits());
        assert_eq!(git.latest_commit_hash(), UNKNOWN_COMMIT);
        assert!(!git.push());
        assert!(git.pull().is_err());
    }

    #[test]
    fn missing_workdir_is_reported_as_exit_code_one() {
        let git = Git::new("/definitely/not/a/dir");
        let outcome = git.run(&["status"]);
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.stderr.contains("spawn git status"));
    }
}
