//! Stall-detecting wait driver
//!
//! Each tick builds a snapshot, checks for a permanent failure, evaluates the
//! target predicate and otherwise compares the snapshot with the last good one.
//! Two counters bound the wait:
//!
//! * `unchanged` resets whenever progress is seen; the wait is stalled once
//!   `interval * unchanged` exceeds the operation timeout.
//! * `ticks` never resets; the wait hits its hard ceiling once
//!   `interval * ticks` exceeds `max_timeout_factor * operation_timeout`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use capiwait_common::Error;

use crate::backend::KubeBackend;
use crate::operation::Operation;
use crate::poll::{PollError, Probe};
use crate::readiness::ReadinessPhase;
use crate::status::ClusterStatusInfo;
use crate::ClusterClient;

/// Target predicate and progress detector of one wait
///
/// The same driver serves cluster creation and both upgrade flavours by
/// swapping this strategy.
pub trait TransitionCheck: Send + Sync {
    /// Operation being waited on, for messages and failure detection
    fn operation(&self) -> Operation;

    /// `Ok` once the cluster reached the desired state
    fn verify(&self, info: &ClusterStatusInfo) -> Result<(), Error>;

    /// Whether anything observable moved between two good snapshots
    fn changed(&self, prev: &ClusterStatusInfo, curr: &ClusterStatusInfo) -> bool;
}

/// Bounds of one stall-detecting wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallBudget {
    /// Tick interval
    pub interval: Duration,
    /// Allowed time without progress
    pub operation_timeout: Duration,
    /// Allowed total time
    pub max_timeout: Duration,
}

impl StallBudget {
    fn stalled(&self, unchanged: u32) -> bool {
        self.interval.saturating_mul(unchanged) > self.operation_timeout
    }

    fn exhausted(&self, ticks: u32) -> bool {
        self.interval.saturating_mul(ticks) > self.max_timeout
    }
}

/// Per-wait state carried from tick to tick
pub struct StallWatch<'a, C> {
    client: &'a ClusterClient,
    cluster: &'a str,
    namespace: &'a str,
    workload: Option<&'a dyn KubeBackend>,
    check: C,
    budget: StallBudget,
    unchanged: u32,
    ticks: u32,
    last_good: Option<ClusterStatusInfo>,
    last_reason: Option<String>,
    phase: ReadinessPhase,
}

impl<'a, C: TransitionCheck> StallWatch<'a, C> {
    /// Watch `cluster` until `check` verifies or the budget runs out
    pub fn new(
        client: &'a ClusterClient,
        cluster: &'a str,
        namespace: &'a str,
        workload: Option<&'a dyn KubeBackend>,
        check: C,
        budget: StallBudget,
    ) -> Self {
        Self {
            client,
            cluster,
            namespace,
            workload,
            check,
            budget,
            unchanged: 0,
            ticks: 0,
            last_good: None,
            last_reason: None,
            phase: ReadinessPhase::Unknown,
        }
    }

    fn observe_phase(&mut self, info: &ClusterStatusInfo) {
        let phase = ReadinessPhase::observe(info);
        if phase != self.phase {
            info!(cluster = %self.cluster, from = %self.phase, to = %phase, "cluster phase changed");
            self.phase = phase;
        }
    }

    fn log_reason(&mut self, err: &Error) {
        let reason = err.to_string();
        if self.last_reason.as_deref() != Some(reason.as_str()) {
            info!(cluster = %self.cluster, operation = %self.check.operation(), "{}", reason);
            self.last_reason = Some(reason);
        }
    }

    /// Advance the counters and decide whether to keep going
    fn settle(&mut self, progressed: bool, last_err: Error) -> PollError {
        if progressed {
            self.unchanged = 0;
        } else {
            self.unchanged += 1;
            debug!(cluster = %self.cluster, unchanged = self.unchanged, "cluster state is unchanged");
        }
        self.ticks += 1;

        let operation = self.check.operation().description().to_string();
        if self.budget.stalled(self.unchanged) {
            return PollError::Terminal(Error::Stalled {
                operation,
                stalled_for: self.budget.interval.saturating_mul(self.unchanged),
                source: Box::new(last_err),
            });
        }
        if self.budget.exhausted(self.ticks) {
            return PollError::Terminal(Error::MaxTimeout {
                operation,
                elapsed: self.budget.interval.saturating_mul(self.ticks),
                source: Box::new(last_err),
            });
        }
        PollError::Transient(last_err)
    }
}

#[async_trait]
impl<'a, C: TransitionCheck> Probe for StallWatch<'a, C> {
    type Output = ();

    async fn probe(&mut self) -> Result<(), PollError> {
        let mut curr = self
            .client
            .get_cluster_status_info(self.cluster, self.namespace, self.workload)
            .await;

        if let Some(failure) = curr.permanent_failure(self.check.operation()) {
            return Err(PollError::Terminal(failure));
        }

        if let Some(err) = curr.take_retrieval_error() {
            if let Some(ambiguous) = several_control_planes(&err) {
                return Err(PollError::Terminal(ambiguous));
            }
            self.log_reason(&err);
            return Err(self.settle(false, err));
        }

        self.observe_phase(&curr);
        let err = match self.check.verify(&curr) {
            Ok(()) => {
                info!(cluster = %self.cluster, operation = %self.check.operation(), "transition complete");
                return Ok(());
            }
            Err(err) => err,
        };

        let progressed = self
            .last_good
            .as_ref()
            .is_some_and(|prev| self.check.changed(prev, &curr));
        if progressed {
            self.client
                .mark_progress_observed(self.cluster, self.namespace)
                .await;
        }
        self.log_reason(&err);
        self.last_good = Some(curr);
        Err(self.settle(progressed, err))
    }
}

/// More than one control plane can never resolve by waiting
fn several_control_planes(err: &Error) -> Option<Error> {
    let Error::Retrieval(agg) = err else {
        return None;
    };
    agg.errors().iter().find_map(|e| match e {
        Error::AmbiguousTopology {
            kind,
            cluster,
            namespace,
            count,
        } if *count > 1 => Some(Error::ambiguous_topology(
            kind.clone(),
            cluster.clone(),
            namespace.clone(),
            *count,
        )),
        _ => None,
    })
}

impl ClusterClient {
    /// Budget derived from the client configuration
    pub fn stall_budget(&self) -> StallBudget {
        StallBudget {
            interval: self.config.stall_poll_interval,
            operation_timeout: self.config.operation_timeout,
            max_timeout: self.config.max_timeout(),
        }
    }

    /// Run a stall-detecting wait for `check`
    pub async fn wait_for_transition<C: TransitionCheck>(
        &self,
        cluster: &str,
        namespace: &str,
        workload: Option<&dyn KubeBackend>,
        check: C,
    ) -> Result<(), Error> {
        let budget = self.stall_budget();
        let watch = StallWatch::new(self, cluster, namespace, workload, check, budget);
        self.poller.poll_unbounded(budget.interval, watch).await
    }
}
