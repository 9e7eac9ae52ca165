//! Supervision of a streaming child process with a timeout and escalating
//! termination.

use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Time a child gets to exit after the graceful signal before it is killed.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(10);

const READ_CHUNK_BYTES: usize = 8192;

/// How a supervised child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited without intervention.
    Exited,
    /// Timed out and exited after the graceful signal.
    Terminated,
    /// Timed out, ignored the graceful signal and was killed.
    Killed,
}

/// Exit information for a supervised child.
#[derive(Debug)]
pub struct SupervisedExit {
    pub status: ExitStatus,
    pub termination: Termination,
}

impl SupervisedExit {
    pub fn timed_out(&self) -> bool {
        self.termination != Termination::Exited
    }
}

/// Limits applied while supervising a child.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub timeout: Duration,
    pub kill_grace: Duration,
}

/// Spawn `cmd`, deliver `stdin` and stream its output into the callbacks
/// until it exits.
///
/// stdout and stderr are drained on scoped threads as data arrives so the
/// child never blocks on a full pipe, and stdin is written on its own thread
/// so the timeout runs from spawn whether or not the child reads its input.
/// When `limits.timeout` expires the child's process group receives SIGTERM;
/// if the child is still alive after `limits.kill_grace` the group is killed
/// outright. Once the child is reaped any processes left in its group are
/// killed so they cannot hold the output pipes open.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs(), grace_secs = limits.kill_grace.as_secs()))]
pub fn run_supervised<O, E>(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: Limits,
    mut on_stdout: O,
    mut on_stderr: E,
) -> Result<SupervisedExit>
where
    O: FnMut(&[u8]) + Send,
    E: FnMut(&[u8]) + Send,
{
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let child_stdin = child.stdin.take();

    thread::scope(|scope| {
        let stdout_handle = scope.spawn(move || pump(stdout, &mut on_stdout));
        let stderr_handle = scope.spawn(move || pump(stderr, &mut on_stderr));
        let stdin_handle = match (child_stdin, stdin) {
            (Some(pipe), Some(input)) => Some(scope.spawn(move || deliver_stdin(pipe, input))),
            _ => None,
        };

        let waited = wait_with_escalation(&mut child, limits);
        if waited.is_err() {
            let _ = child.kill();
            let _ = child.wait();
        }
        // Stragglers in the group would keep the pipes open.
        kill_group(&child);
        let exit = waited?;

        if let Some(handle) = stdin_handle
            && handle.join().is_err()
        {
            warn!("stdin writer thread panicked");
        }
        join_reader(stdout_handle).context("join stdout")?;
        join_reader(stderr_handle).context("join stderr")?;

        debug!(exit_code = ?exit.status.code(), termination = ?exit.termination, "child finished");
        Ok(exit)
    })
}

/// Write the prompt, then drop the pipe so the child sees end-of-input.
fn deliver_stdin(mut pipe: ChildStdin, input: &[u8]) {
    match pipe.write_all(input) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
            warn!("child closed stdin before reading all input");
        }
        Err(e) => warn!(err = %e, "failed to write stdin"),
    }
}

fn wait_with_escalation(child: &mut Child, limits: Limits) -> Result<SupervisedExit> {
    if let Some(status) = child.wait_timeout(limits.timeout).context("wait for child")? {
        return Ok(SupervisedExit {
            status,
            termination: Termination::Exited,
        });
    }

    warn!(
        timeout_secs = limits.timeout.as_secs(),
        "child timed out, sending SIGTERM"
    );
    terminate(child)?;
    if let Some(status) = child
        .wait_timeout(limits.kill_grace)
        .context("wait for child after SIGTERM")?
    {
        return Ok(SupervisedExit {
            status,
            termination: Termination::Terminated,
        });
    }

    warn!(
        grace_secs = limits.kill_grace.as_secs(),
        "child ignored SIGTERM, killing"
    );
    kill_group(child);
    child.kill().context("kill child")?;
    let status = child.wait().context("wait child after kill")?;
    Ok(SupervisedExit {
        status,
        termination: Termination::Killed,
    })
}

/// Send SIGTERM to the child's process group.
#[cfg(unix)]
fn terminate(child: &Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::Signal;

    match signal_group(child, Signal::SIGTERM) {
        // Already gone; the following wait reaps it.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(err).context("send SIGTERM"),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> Result<()> {
    child.kill().context("terminate child")
}

/// SIGKILL whatever is left in the child's process group.
#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::errno::Errno;
    use nix::sys::signal::Signal;

    match signal_group(child, Signal::SIGKILL) {
        Ok(()) => debug!("killed remaining process group members"),
        Err(Errno::ESRCH) => {}
        Err(err) => warn!(err = %err, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) -> nix::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    // The child leads its own group, so its pid is the group id.
    let pgid = i32::try_from(child.id()).map_err(|_| Errno::EINVAL)?;
    killpg(Pid::from_raw(pgid), signal)
}

fn pump<R: Read>(mut reader: R, sink: &mut dyn FnMut(&[u8])) -> Result<()> {
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("read output"),
        };
        sink(&chunk[..n]);
    }
}

fn join_reader(handle: thread::ScopedJoinHandle<'_, Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn limits(timeout_ms: u64, grace_ms: u64) -> Limits {
        Limits {
            timeout: Duration::from_millis(timeout_ms),
            kill_grace: Duration::from_millis(grace_ms),
        }
    }

    #[test]
    fn streams_stdout_and_stderr_and_delivers_stdin() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let exit = run_supervised(
            sh("cat; echo oops >&2; exit 3"),
            Some(b"hello prompt"),
            limits(5_000, 1_000),
            |chunk| out.extend_from_slice(chunk),
            |chunk| err.extend_from_slice(chunk),
        )
        .expect("run");

        assert_eq!(exit.termination, Termination::Exited);
        assert_eq!(exit.status.code(), Some(3));
        assert_eq!(out, b"hello prompt");
        assert_eq!(err, b"oops\n");
    }

    #[test]
    fn timeout_sends_sigterm_first() {
        let start = Instant::now();
        let exit = run_supervised(
            sh("exec sleep 30"),
            None,
            limits(200, 5_000),
            |_| {},
            |_| {},
        )
        .expect("run");

        assert_eq!(exit.termination, Termination::Terminated);
        assert!(exit.timed_out());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn timeout_escalates_to_kill_when_sigterm_is_ignored() {
        let start = Instant::now();
        let exit = run_supervised(
            sh("trap '' TERM; exec sleep 30"),
            None,
            limits(200, 300),
            |_| {},
            |_| {},
        )
        .expect("run");

        assert_eq!(exit.termination, Termination::Killed);
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn timeout_holds_while_child_ignores_a_large_stdin() {
        let input = vec![b'x'; 512 * 1024];
        let start = Instant::now();
        let exit = run_supervised(
            sh("exec sleep 30"),
            Some(input.as_slice()),
            limits(200, 300),
            |_| {},
            |_| {},
        )
        .expect("run");

        assert!(exit.timed_out());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn background_children_do_not_outlive_the_timeout() {
        let start = Instant::now();
        let exit = run_supervised(
            sh("sleep 30 & exec sleep 30"),
            None,
            limits(200, 300),
            |_| {},
            |_| {},
        )
        .expect("run");

        assert!(exit.timed_out());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn background_children_are_reaped_after_a_clean_exit() {
        let start = Instant::now();
        let mut out = Vec::new();
        let exit = run_supervised(
            sh("sleep 30 & echo finished"),
            None,
            limits(10_000, 1_000),
            |chunk| out.extend_from_slice(chunk),
            |_| {},
        )
        .expect("run");

        assert_eq!(exit.termination, Termination::Exited);
        assert_eq!(exit.status.code(), Some(0));
        assert_eq!(out, b"finished\n");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_supervised(
            Command::new("/definitely/not/a/binary"),
            None,
            limits(1_000, 1_000),
            |_| {},
            |_| {},
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("spawn command"));
    }
}
