//! Clock and polling primitives.
//!
//! Receipt polling, escalation and RPC retries never call `tokio::time::sleep`
//! directly. They go through a [`Scheduler`] so tests can drive them with a
//! virtual clock instead of real wall-clock delays.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Source of time and delays.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Current unix time in seconds.
    fn now_unix(&self) -> u64;

    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock scheduler backed by tokio timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    fn now_unix(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock: `sleep` returns immediately and advances time.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    now_ms: AtomicU64,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualScheduler {
    pub fn new(start_unix: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_unix.saturating_mul(1000)),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Move the clock forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.now_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Scheduler for ManualScheduler {
    fn now_unix(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst) / 1000
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// How often to poll and when to give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls until cancelled.
    pub max_attempts: Option<u32>,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// Result of advancing a [`Poller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// Poll now; carries the 1-based attempt number.
    Attempt(u32),
    /// `max_attempts` reached.
    Exhausted,
    /// The cancellation token fired.
    Cancelled,
}

/// Explicit polling state machine.
///
/// The first [`Poller::tick`] returns immediately, later ticks wait one
/// interval on the scheduler first.
#[derive(Debug)]
pub struct Poller {
    policy: PollPolicy,
    attempts: u32,
    cancel: Option<CancellationToken>,
}

impl Poller {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub async fn tick(&mut self, scheduler: &dyn Scheduler) -> PollStep {
        if self.is_cancelled() {
            return PollStep::Cancelled;
        }
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return PollStep::Exhausted;
            }
        }

        if self.attempts > 0 {
            match &self.cancel {
                Some(token) => {
                    tokio::select! {
                        _ = scheduler.sleep(self.policy.interval) => {}
                        _ = token.cancelled() => return PollStep::Cancelled,
                    }
                }
                None => scheduler.sleep(self.policy.interval).await,
            }
        }

        self.attempts += 1;
        PollStep::Attempt(self.attempts)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poller_exhausts_after_max_attempts() {
        let scheduler = ManualScheduler::new(1_000);
        let mut poller = Poller::new(PollPolicy::new(Duration::from_secs(1), Some(3)));

        assert_eq!(poller.tick(&scheduler).await, PollStep::Attempt(1));
        assert_eq!(poller.tick(&scheduler).await, PollStep::Attempt(2));
        assert_eq!(poller.tick(&scheduler).await, PollStep::Attempt(3));
        assert_eq!(poller.tick(&scheduler).await, PollStep::Exhausted);

        // First attempt does not wait.
        assert_eq!(scheduler.sleeps().len(), 2);
        assert_eq!(scheduler.now_unix(), 1_002);
    }

    #[tokio::test]
    async fn test_poller_cancellation() {
        let scheduler = ManualScheduler::new(0);
        let token = CancellationToken::new();
        let mut poller =
            Poller::new(PollPolicy::new(Duration::from_secs(1), None)).with_cancellation(token.clone());

        assert_eq!(poller.tick(&scheduler).await, PollStep::Attempt(1));
        token.cancel();
        assert_eq!(poller.tick(&scheduler).await, PollStep::Cancelled);
        assert_eq!(poller.attempts(), 1);
    }

    #[test]
    fn test_manual_scheduler_advance() {
        let scheduler = ManualScheduler::new(100);
        scheduler.advance(Duration::from_millis(2_500));
        assert_eq!(scheduler.now_unix(), 102);
        assert!(scheduler.sleeps().is_empty());
    }
}
