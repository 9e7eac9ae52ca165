//! Cooperative shutdown and interruptible waits.
//!
//! A termination signal only flips the [`ShutdownToken`]. The scheduler
//! checks it at the top of every cycle and at every countdown tick, so an
//! in-flight agent run always finishes (or times out) before exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

/// Granularity at which countdowns observe cancellation.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    cancelled: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cancel `token` on SIGINT or SIGTERM.
pub fn install_signal_handler(token: &ShutdownToken) -> Result<()> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        if !token.is_cancelled() {
            info!("termination signal received, shutting down after current step");
        }
        token.cancel();
    })
    .context("install signal handler")
}

/// Sleep for `total`, waking every `tick` to report the remaining time and
/// check for cancellation.
///
/// Returns `true` when the full duration elapsed and `false` when the sleep
/// was cut short by cancellation.
pub fn sleep_with_countdown<F>(
    total: Duration,
    tick: Duration,
    token: &ShutdownToken,
    mut on_tick: F,
) -> bool
where
    F: FnMut(Duration),
{
    let deadline = Instant::now() + total;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        on_tick(remaining);
        thread::sleep(remaining.min(tick));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_full_duration_and_reports_ticks() {
        let token = ShutdownToken::new();
        let mut ticks = Vec::new();
        let completed = sleep_with_countdown(
            Duration::from_millis(120),
            Duration::from_millis(50),
            &token,
            |remaining| ticks.push(remaining),
        );

        assert!(completed);
        assert!(ticks.len() >= 3, "{ticks:?}");
        assert!(ticks.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn cancellation_mid_sleep_returns_early() {
        let token = ShutdownToken::new();
        let canceller = token.clone();
        let start = Instant::now();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });
        let completed = sleep_with_countdown(
            Duration::from_secs(30),
            Duration::from_millis(20),
            &token,
            |_| {},
        );
        handle.join().expect("join");

        assert!(!completed);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn already_cancelled_token_never_sleeps() {
        let token = ShutdownToken::new();
        token.cancel();
        let mut ticked = false;
        assert!(!sleep_with_countdown(
            Duration::from_secs(30),
            DEFAULT_TICK,
            &token,
            |_| ticked = true,
        ));
        assert!(!ticked);
    }
}
