//! Retry policy for opening a stream
//!
//! A failed attempt is retried only when the error is transient and the
//! attempt budget is not spent. Waits start at the base backoff and double
//! after every retry, up to the configured cap.

use crate::error::RgetError;
use rget_types::{FetchEvent, Settings};
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Attempt budget and backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
            max_backoff,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.max_retries,
            settings.base_backoff(),
            settings.max_backoff(),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another
    pub fn should_retry(&self, error: &RgetError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// Wait before the first retry
    pub fn first_backoff(&self) -> Duration {
        self.base_backoff.min(self.max_backoff)
    }

    /// Wait after `current`: doubled, never above the cap
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

/// Where a retried operation stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    /// Attempt `attempt` is in flight; `backoff` is the wait if it fails
    Attempting { attempt: u32, backoff: Duration },
    /// Attempt `attempt` failed and the next one starts after `wait`
    Retrying { attempt: u32, wait: Duration },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl RetryState {
    pub fn begin(self, policy: &RetryPolicy) -> Self {
        match self {
            RetryState::Idle => RetryState::Attempting {
                attempt: 1,
                backoff: policy.first_backoff(),
            },
            other => other,
        }
    }

    pub fn succeed(self) -> Self {
        match self {
            RetryState::Attempting { attempt, .. } => RetryState::Succeeded { attempts: attempt },
            other => other,
        }
    }

    pub fn fail(self, policy: &RetryPolicy, error: &RgetError) -> Self {
        match self {
            RetryState::Attempting { attempt, backoff } => {
                if policy.should_retry(error, attempt) {
                    RetryState::Retrying {
                        attempt,
                        wait: backoff,
                    }
                } else {
                    RetryState::Exhausted { attempts: attempt }
                }
            }
            other => other,
        }
    }

    /// Leave the backoff sleep and start the next attempt
    pub fn wake(self, policy: &RetryPolicy) -> Self {
        match self {
            RetryState::Retrying { attempt, wait } => RetryState::Attempting {
                attempt: attempt + 1,
                backoff: policy.next_backoff(wait),
            },
            other => other,
        }
    }

    pub fn attempt(&self) -> u32 {
        match self {
            RetryState::Idle => 0,
            RetryState::Attempting { attempt, .. } | RetryState::Retrying { attempt, .. } => *attempt,
            RetryState::Succeeded { attempts } | RetryState::Exhausted { attempts } => *attempts,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the budget runs out.
///
/// `op` receives the 1-based attempt number. Cancellation is observed while
/// an attempt is in flight and during every backoff sleep.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    events: &broadcast::Sender<FetchEvent>,
    mut op: F,
) -> Result<T, RgetError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RgetError>>,
{
    let mut state = RetryState::Idle.begin(policy);

    loop {
        let attempt = state.attempt();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RgetError::Cancelled),
            result = op(attempt) => result,
        };

        let error = match result {
            Ok(value) => {
                state = state.succeed();
                debug!("Succeeded after {} attempt(s)", state.attempt());
                return Ok(value);
            }
            Err(RgetError::Cancelled) => return Err(RgetError::Cancelled),
            Err(e) => e,
        };

        state = state.fail(policy, &error);
        let RetryState::Retrying { wait, .. } = state else {
            return Err(error);
        };

        warn!(
            "Attempt {}/{} failed ({}). Retrying in {:.1}s",
            attempt,
            policy.max_attempts(),
            error.reason(),
            wait.as_secs_f64()
        );
        let _ = events.send(FetchEvent::Retrying {
            attempt,
            max_attempts: policy.max_attempts(),
            wait_ms: wait.as_millis() as u64,
            reason: error.reason(),
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RgetError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }

        state = state.wake(policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn unavailable() -> RgetError {
        RgetError::HttpStatus {
            status: 503,
            url: "https://example.com/f".to_string(),
        }
    }

    fn policy(max: u32) -> RetryPolicy {
        RetryPolicy::new(max, Duration::from_secs(1), Duration::from_secs(60))
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RetryPolicy::new(20, Duration::from_secs(1), Duration::from_secs(10));
        let mut wait = policy.first_backoff();
        let mut seen = vec![wait];
        for _ in 0..5 {
            wait = policy.next_backoff(wait);
            seen.push(wait);
        }
        let secs: Vec<u64> = seen.iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_state_machine_exhausts_after_budget() {
        let policy = policy(3);
        let err = unavailable();
        let mut state = RetryState::Idle.begin(&policy);
        let mut waits = Vec::new();

        loop {
            state = state.fail(&policy, &err);
            match state {
                RetryState::Retrying { wait, .. } => {
                    waits.push(wait);
                    state = state.wake(&policy);
                }
                RetryState::Exhausted { attempts } => {
                    assert_eq!(attempts, 3);
                    break;
                }
                other => panic!("unexpected state {:?}", other),
            }
        }

        assert_eq!(waits, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn test_permanent_error_exhausts_immediately() {
        let policy = policy(5);
        let not_found = RgetError::HttpStatus {
            status: 404,
            url: "https://example.com/f".to_string(),
        };
        let state = RetryState::Idle.begin(&policy).fail(&policy, &not_found);
        assert_eq!(state, RetryState::Exhausted { attempts: 1 });
    }

    #[test]
    fn test_zero_budget_still_attempts_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_sleeps_between_attempts() {
        let (tx, mut rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), RgetError> = with_retry(&policy(3), &cancel, &tx, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(unavailable()) }
        })
        .await;

        assert!(matches!(result, Err(RgetError::HttpStatus { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff on the paused clock
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));

        let mut waits = Vec::new();
        while let Ok(FetchEvent::Retrying { wait_ms, .. }) = rx.try_recv() {
            waits.push(wait_ms);
        }
        assert_eq!(waits, vec![1000, 2000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers() {
        let (tx, _rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result = with_retry(&policy(3), &cancel, &tx, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(unavailable())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_observes_cancellation() {
        let (tx, _rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let result: Result<(), RgetError> = with_retry(&policy(5), &cancel, &tx, |_| {
            trigger.cancel();
            async { Err(unavailable()) }
        })
        .await;

        assert!(matches!(result, Err(RgetError::Cancelled)));
    }
}
