//! Time source used by the poller
//!
//! Production code sleeps on the tokio timer. Tests use [`ManualClock`], where
//! sleeping advances virtual time instantly so multi-minute waits run in
//! microseconds and every requested delay can be asserted on.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Source of "now" and of inter-tick suspension
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio runtime timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Shared handle to the default production clock
pub fn tokio_clock() -> Arc<dyn Clock> {
    Arc::new(TokioClock)
}

#[derive(Debug)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

/// Virtual clock whose sleeps return immediately
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    state: Arc<Mutex<ManualState>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Arc::new(Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Move virtual time forward without recording a sleep
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.elapsed += by;
    }

    /// Virtual time elapsed since creation
    pub fn elapsed(&self) -> Duration {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).elapsed
    }

    /// Every duration passed to [`Clock::sleep`], in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sleeps
            .clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.elapsed += duration;
            state.sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_sleep_advances_virtual_time() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_secs(15)).await;
        clock.sleep(Duration::from_secs(15)).await;
        clock.advance(Duration::from_secs(1));

        assert_eq!(clock.now() - start, Duration::from_secs(31));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(15), Duration::from_secs(15)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_runtime_time() {
        let clock = TokioClock;
        let start = clock.now();
        clock.sleep(Duration::from_secs(60)).await;
        assert!(clock.now() - start >= Duration::from_secs(60));
    }
}
