//! Status polling state machine.
//!
//! `PENDING/RUNNING -> (poll) -> {PENDING/RUNNING, COMPLETED, FAILED}`
//!
//! The first poll fires immediately; after each non-terminal response the
//! poller sleeps the current backoff interval and then multiplies it, capped
//! at the policy maximum. Transient fetch errors get a doubled wait and a
//! retry counter; past the ceiling the poller gives up with a connectivity
//! outcome (the backend job may still be running). The timer seam and the
//! status seam are both traits so tests drive the machine without real
//! clocks or sockets.

use crate::error::ApiError;
use crate::models::{BacktestState, BacktestStatus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

// =============================================================================
// POLICY
// =============================================================================

/// Backoff policy shared by the status poller and the result hydrator.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Wait after the first non-terminal response.
    pub initial_delay: Duration,
    /// Interval growth per non-terminal response (> 1).
    pub backoff_multiplier: f64,
    /// Ceiling for any single wait.
    pub max_delay: Duration,
    /// Transient-error retries before giving up.
    pub retry_limit: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(2000),
            backoff_multiplier: 1.5,
            max_delay: Duration::from_millis(10_000),
            retry_limit: 3,
        }
    }
}

impl PollPolicy {
    /// Next backoff interval: multiplied, never decreasing, capped.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let scaled = current.mul_f64(self.backoff_multiplier.max(1.0));
        scaled.min(self.max_delay)
    }

    /// Wait before retrying after a transient error: doubled, same cap.
    pub fn error_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }
}

// =============================================================================
// SEAMS
// =============================================================================

/// Where status snapshots come from. Implemented by
/// [`crate::client::BacktestClient`]; tests script their own.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, backtest_id: &str) -> Result<BacktestStatus, ApiError>;
}

/// Timer seam so tests run without real delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Terminal result of one poll loop. Yielded exactly once.
#[derive(Debug)]
pub enum PollOutcome {
    /// The backend reported `completed`.
    Completed(BacktestStatus),
    /// The backend reported `failed`; message surfaced verbatim.
    Failed { message: String },
    /// Transient errors exceeded the retry ceiling. The backend job may
    /// still be running; the caller decides whether to resume watching.
    ConnectivityLost { attempts: u32, last_error: ApiError },
    /// Non-retryable API error (server rejection, unauthorized, bad payload).
    Error(ApiError),
    /// The cancel handle fired before a terminal state was observed.
    Cancelled,
}

/// Cancels a running poll loop. Safe to call from another task; dropping the
/// handle without calling [`cancel`](CancelHandle::cancel) lets the loop run
/// to completion.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

// =============================================================================
// POLLER
// =============================================================================

pub struct StatusPoller<S: ?Sized, T = TokioSleeper> {
    source: Arc<S>,
    policy: PollPolicy,
    sleeper: T,
    cancel_rx: watch::Receiver<bool>,
}

impl<S: StatusSource + ?Sized> StatusPoller<S> {
    pub fn new(source: Arc<S>, policy: PollPolicy) -> (Self, CancelHandle) {
        Self::with_sleeper(source, policy, TokioSleeper)
    }
}

impl<S: StatusSource + ?Sized, T: Sleeper> StatusPoller<S, T> {
    pub fn with_sleeper(source: Arc<S>, policy: PollPolicy, sleeper: T) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                source,
                policy,
                sleeper,
                cancel_rx: rx,
            },
            CancelHandle { tx },
        )
    }

    /// Poll until a terminal state, a connectivity failure, or cancellation.
    ///
    /// `on_poll` observes every non-terminal snapshot (progress display);
    /// the terminal outcome is the return value, delivered exactly once.
    /// After cancellation no further observation or state mutation happens.
    pub async fn run<F>(&mut self, backtest_id: &str, mut on_poll: F) -> PollOutcome
    where
        F: FnMut(&BacktestStatus) + Send,
    {
        let mut delay = self.policy.initial_delay;
        let mut attempts: u32 = 0;

        if self.is_cancelled() {
            return PollOutcome::Cancelled;
        }

        loop {
            match self.source.fetch_status(backtest_id).await {
                Ok(status) => {
                    attempts = 0;
                    match status.state {
                        BacktestState::Completed => {
                            debug!(backtest_id, "Backtest completed");
                            return PollOutcome::Completed(status);
                        }
                        BacktestState::Failed => {
                            debug!(backtest_id, "Backtest failed: {}", status.message);
                            return PollOutcome::Failed {
                                message: status.message,
                            };
                        }
                        BacktestState::Pending | BacktestState::Running => {
                            on_poll(&status);
                            debug!(
                                backtest_id,
                                state = status.state.as_str(),
                                next_poll_ms = delay.as_millis() as u64,
                                "Backtest still in progress"
                            );
                            if self.wait(delay).await {
                                return PollOutcome::Cancelled;
                            }
                            delay = self.policy.next_delay(delay);
                        }
                    }
                }
                Err(e) if e.is_retryable() => {
                    attempts += 1;
                    warn!(
                        backtest_id,
                        attempt = attempts,
                        "Error polling backtest status: {}",
                        e
                    );
                    if attempts > self.policy.retry_limit {
                        return PollOutcome::ConnectivityLost {
                            attempts,
                            last_error: e,
                        };
                    }
                    if self.wait(self.policy.error_delay(delay)).await {
                        return PollOutcome::Cancelled;
                    }
                }
                Err(e) => return PollOutcome::Error(e),
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Sleep for `duration` unless cancelled first. Returns true on cancel.
    async fn wait(&mut self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        tokio::select! {
            changed = self.cancel_rx.changed() => {
                if changed.is_ok() && *self.cancel_rx.borrow() {
                    true
                } else {
                    // Handle dropped without cancelling; finish the wait.
                    self.sleeper.sleep(duration).await;
                    false
                }
            }
            _ = self.sleeper.sleep(duration) => false,
        }
    }
}

// =============================================================================
// PROGRESS
// =============================================================================

/// Client-side progress estimate shown while the backend grinds. Fast early,
/// slower later, parks at 95 until a real terminal state arrives. A
/// backend-reported progress value always wins (kept monotone).
#[derive(Debug, Clone, Default)]
pub struct ProgressEstimator {
    current: f64,
}

impl ProgressEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> f64 {
        self.current
    }

    /// Fold in one non-terminal status snapshot.
    pub fn observe(&mut self, status: &BacktestStatus) -> f64 {
        match status.progress {
            Some(reported) => {
                self.current = self.current.max(reported.clamp(0.0, 100.0));
            }
            None => self.advance(),
        }
        self.current
    }

    fn advance(&mut self) {
        self.current = if self.current < 50.0 {
            (self.current + 8.0).min(50.0)
        } else if self.current < 80.0 {
            (self.current + 4.0).min(80.0)
        } else {
            (self.current + 1.0).min(95.0)
        };
    }

    pub fn complete(&mut self) -> f64 {
        self.current = 100.0;
        self.current
    }
}
