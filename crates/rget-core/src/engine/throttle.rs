//! Session-average bandwidth throttle
//!
//! After each chunk the throttle compares the time the bytes written so far
//! should have taken at the ceiling with the time actually spent, and sleeps
//! the difference. The cap applies to the whole session, so a slow start
//! lets later chunks catch up without waiting.

use crate::error::RgetError;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cooperative rate cap for one transfer session
#[derive(Debug)]
pub struct Throttle {
    /// Ceiling in bytes per second (0 = unlimited)
    limit: u64,
    /// Session start
    started: Instant,
    /// Bytes recorded this session
    sent: u64,
}

impl Throttle {
    /// Create a throttle with a given bytes-per-second ceiling
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            limit: bytes_per_second,
            started: Instant::now(),
            sent: 0,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit == 0
    }

    pub fn record(&mut self, bytes: u64) {
        self.sent = self.sent.saturating_add(bytes);
    }

    /// How long to wait given `elapsed` time since the session started
    pub fn delay_after(&self, elapsed: Duration) -> Duration {
        if self.is_unlimited() {
            return Duration::ZERO;
        }
        let expected = Duration::try_from_secs_f64(self.sent as f64 / self.limit as f64)
            .unwrap_or(Duration::MAX);
        expected.saturating_sub(elapsed)
    }

    /// Record `bytes` and sleep until the session average is back under the ceiling
    pub async fn pace(&mut self, bytes: u64, cancel: &CancellationToken) -> Result<(), RgetError> {
        self.record(bytes);
        let delay = self.delay_after(self.started.elapsed());
        if delay.is_zero() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RgetError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_is_expected_minus_elapsed() {
        let mut throttle = Throttle::new(1000); // 1KB/s
        throttle.record(500);
        assert_eq!(throttle.delay_after(Duration::ZERO), Duration::from_millis(500));
        assert_eq!(throttle.delay_after(Duration::from_millis(200)), Duration::from_millis(300));
        // Behind schedule: no wait
        assert_eq!(throttle.delay_after(Duration::from_secs(1)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_caps_session_rate() {
        let cancel = CancellationToken::new();
        let mut throttle = Throttle::new(100 * 1024); // 100 KiB/s

        let start = Instant::now();
        for _ in 0..16 {
            throttle.pace(64 * 1024, &cancel).await.unwrap(); // 1 MiB total
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10), "took {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(11), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_throttle_unlimited() {
        let cancel = CancellationToken::new();
        let mut throttle = Throttle::new(0);

        let start = std::time::Instant::now();
        for _ in 0..100 {
            throttle.pace(10000, &cancel).await.unwrap();
        }
        let elapsed = start.elapsed();
        assert!(elapsed.as_millis() < 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_sleep_is_cancellable() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut throttle = Throttle::new(10);
        let result = throttle.pace(1000, &cancel).await;
        assert!(matches!(result, Err(RgetError::Cancelled)));
    }
}
