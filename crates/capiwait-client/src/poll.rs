//! Bounded and unbounded polling
//!
//! A probe is called immediately and then once per interval until it succeeds
//! or signals a terminal error. Bounded polls additionally give up once the
//! next tick would start past the timeout, returning the last transient error
//! wrapped as [`Error::Timeout`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use capiwait_common::Error;

use crate::clock::{tokio_clock, Clock};

/// Message used when a bounded poll runs out of time
pub const TIMEOUT_MESSAGE: &str = "timed out waiting for the condition";

/// Interval and timeout for one poll-wrapped call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Delay between two probe invocations
    pub interval: Duration,
    /// Budget after which the poll gives up
    pub timeout: Duration,
}

impl PollOptions {
    /// Create poll options
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Outcome of a failed probe invocation
#[derive(Debug)]
pub enum PollError {
    /// Not there yet, try again on the next tick
    Transient(Error),
    /// Stop polling and return this error
    Terminal(Error),
}

impl PollError {
    /// The wrapped error, regardless of classification
    pub fn into_inner(self) -> Error {
        match self {
            Self::Transient(e) | Self::Terminal(e) => e,
        }
    }

    /// Whether the poller must stop
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

impl From<Error> for PollError {
    fn from(err: Error) -> Self {
        Self::Transient(err)
    }
}

/// One tick of a poll loop
///
/// Takes `&mut self` so stateful probes can carry counters and snapshots from
/// one tick to the next. Any `FnMut() -> impl Future<Output = Result<T, PollError>>`
/// is a probe.
#[async_trait]
pub trait Probe: Send {
    /// Value produced on success
    type Output: Send;

    /// Run one attempt
    async fn probe(&mut self) -> Result<Self::Output, PollError>;
}

#[async_trait]
impl<F, Fut, T> Probe for F
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, PollError>> + Send,
    T: Send + 'static,
{
    type Output = T;

    async fn probe(&mut self) -> Result<T, PollError> {
        (self)().await
    }
}

/// Drives probes against an injected clock
#[derive(Clone)]
pub struct Poller {
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller").finish_non_exhaustive()
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(tokio_clock())
    }
}

impl Poller {
    /// Create a poller using the given clock
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// The clock this poller sleeps on
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Sleep on the poller's clock
    pub async fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration).await;
    }

    /// Poll until success, a terminal error, or `timeout`
    ///
    /// The first call happens immediately. A timeout shorter than the interval
    /// therefore yields exactly one attempt and no sleep.
    pub async fn poll_bounded<P: Probe>(
        &self,
        interval: Duration,
        timeout: Duration,
        mut probe: P,
    ) -> Result<P::Output, Error> {
        validate_interval(interval)?;
        let start = self.clock.now();
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match probe.probe().await {
                Ok(value) => return Ok(value),
                Err(PollError::Terminal(err)) => return Err(err),
                Err(PollError::Transient(err)) => {
                    let elapsed = self.clock.now().saturating_duration_since(start);
                    if elapsed.saturating_add(interval) > timeout {
                        trace!(attempt, ?elapsed, error = %err, "poll timed out");
                        return Err(Error::timeout(TIMEOUT_MESSAGE, err));
                    }
                    trace!(attempt, error = %err, "condition not met, retrying");
                    self.clock.sleep(interval).await;
                }
            }
        }
    }

    /// Poll until success or a terminal error
    ///
    /// The probe owns the decision to give up.
    pub async fn poll_unbounded<P: Probe>(
        &self,
        interval: Duration,
        mut probe: P,
    ) -> Result<P::Output, Error> {
        validate_interval(interval)?;
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match probe.probe().await {
                Ok(value) => return Ok(value),
                Err(PollError::Terminal(err)) => return Err(err),
                Err(PollError::Transient(err)) => {
                    trace!(attempt, error = %err, "condition not met, retrying");
                    self.clock.sleep(interval).await;
                }
            }
        }
    }

    /// Single attempt when `options` is `None`, bounded poll otherwise
    pub async fn poll_with<P: Probe>(
        &self,
        options: Option<PollOptions>,
        mut probe: P,
    ) -> Result<P::Output, Error> {
        match options {
            Some(opts) => self.poll_bounded(opts.interval, opts.timeout, probe).await,
            None => probe.probe().await.map_err(PollError::into_inner),
        }
    }
}

fn validate_interval(interval: Duration) -> Result<(), Error> {
    if interval.is_zero() {
        return Err(Error::validation("poll interval must be greater than zero"));
    }
    Ok(())
}
