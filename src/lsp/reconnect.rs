//! Reconnection scheduling
//!
//! Owns the attempt counter and the single pending retry timer. Arming a new
//! timer always cancels the previous one first, so at most one retry is ever
//! pending.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Growth factor between consecutive attempts
const BACKOFF_FACTOR: f64 = 1.5;

/// The multiplier never exceeds this, whatever the attempt number
const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

/// Exponential backoff: `min(base * min(1.5^attempt, 10), max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        // Past ~6 attempts the multiplier is pinned at the cap anyway
        let exponent = attempt.min(64) as i32;
        let multiplier = BACKOFF_FACTOR.powi(exponent).min(MAX_BACKOFF_MULTIPLIER);
        Duration::try_from_secs_f64(self.base.as_secs_f64() * multiplier)
            .unwrap_or(Duration::MAX)
            .min(self.max)
    }
}

/// Identifies one armed timer so a late firing can tell it was superseded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryToken(u64);

struct PendingRetry {
    token: RetryToken,
    handle: JoinHandle<()>,
}

/// Attempt counter plus the single pending retry timer
pub struct ReconnectScheduler {
    backoff: Backoff,
    force_delay: Duration,
    attempts: u32,
    next_token: u64,
    pending: Option<PendingRetry>,
}

impl ReconnectScheduler {
    pub fn new(backoff: Backoff, force_delay: Duration) -> Self {
        Self {
            backoff,
            force_delay,
            attempts: 0,
            next_token: 0,
            pending: None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Called after a successful open + handshake.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Arm a backoff retry for the current attempt number, then advance it.
    ///
    /// `fire` builds the work to run when the timer elapses; it receives the
    /// token it must hand back to [`complete`](Self::complete).
    pub fn schedule_retry<F, Fut>(&mut self, fire: F) -> Duration
    where
        F: FnOnce(RetryToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.backoff.delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        self.arm(delay, fire);
        delay
    }

    /// Arm a short fixed-delay retry; the attempt counter is left alone.
    pub fn schedule_forced<F, Fut>(&mut self, fire: F) -> Duration
    where
        F: FnOnce(RetryToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.force_delay;
        self.arm(delay, fire);
        delay
    }

    /// Cancel the pending timer, if any. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Claim the pending slot from inside a firing timer.
    ///
    /// Returns false when `token` was cancelled or superseded, in which case
    /// the caller must not act.
    pub fn complete(&mut self, token: RetryToken) -> bool {
        match &self.pending {
            Some(pending) if pending.token == token => {
                // Drop without aborting: the caller is that very task
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    fn arm<F, Fut>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce(RetryToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        self.next_token += 1;
        let token = RetryToken(self.next_token);
        let work = fire(token);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            work.await;
        });

        self.pending = Some(PendingRetry { token, handle });
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
