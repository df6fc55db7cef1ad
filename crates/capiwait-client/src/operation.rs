//! Operation bookkeeping persisted on the cluster object
//!
//! Two annotations record which operation is running and when progress was
//! last observed. Other processes (or a restarted CLI) read them back to tell
//! a slow rollout from a stalled one.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use capiwait_common::{Error, OPERATION_INFO_ANNOTATION, OPERATION_LAST_OBSERVED_ANNOTATION};

use crate::capi::Cluster;
use crate::ClusterClient;

/// Schema version of [`OperationStatus`]
pub const OPERATION_STATUS_VERSION: u32 = 1;

/// Long-running operation on a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Initial provisioning
    Create,
    /// Kubernetes version upgrade
    Upgrade,
}

impl Operation {
    /// Short identifier stored in the annotation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Upgrade => "upgrade",
        }
    }

    /// Human description used in failure messages
    pub fn description(&self) -> &'static str {
        match self {
            Self::Create => "cluster creation",
            Self::Upgrade => "kubernetes version update",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "upgrade" => Ok(Self::Upgrade),
            other => Err(Error::validation(format!(
                "unknown operation '{}', expected 'create' or 'upgrade'",
                other
            ))),
        }
    }
}

/// Record stored in the operation-info annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    /// Schema version
    pub version: u32,
    /// Running operation
    pub operation: Operation,
    /// Budget in seconds
    pub operation_timeout: u64,
    /// When the operation started
    pub operation_start_timestamp: DateTime<Utc>,
}

impl OperationStatus {
    /// Record for an operation starting at `started`
    pub fn new(operation: Operation, timeout: Duration, started: DateTime<Utc>) -> Self {
        Self {
            version: OPERATION_STATUS_VERSION,
            operation,
            operation_timeout: timeout.as_secs(),
            operation_start_timestamp: started,
        }
    }

    /// Budget as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout)
    }
}

/// Operation bookkeeping read back from a cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    /// The persisted status
    pub status: OperationStatus,
    /// Last time progress was observed, if ever
    pub last_observed: Option<DateTime<Utc>>,
}

impl OperationRecord {
    /// Parse both annotations of a cluster; `None` when no operation was recorded
    pub fn from_cluster(cluster: &Cluster) -> Result<Option<Self>, Error> {
        let Some(raw) = cluster.annotation(OPERATION_INFO_ANNOTATION) else {
            return Ok(None);
        };
        let status: OperationStatus = serde_json::from_str(raw).map_err(|e| {
            Error::serialization_for_kind(
                "Cluster",
                format!("invalid {} annotation: {}", OPERATION_INFO_ANNOTATION, e),
            )
        })?;
        if status.version > OPERATION_STATUS_VERSION {
            return Err(Error::validation(format!(
                "{} annotation has unsupported version {}",
                OPERATION_INFO_ANNOTATION, status.version
            )));
        }
        let last_observed = cluster
            .annotation(OPERATION_LAST_OBSERVED_ANNOTATION)
            .map(parse_timestamp)
            .transpose()?;
        Ok(Some(Self {
            status,
            last_observed,
        }))
    }

    /// Last progress, falling back to the operation start
    pub fn last_progress(&self) -> DateTime<Utc> {
        self.last_observed
            .unwrap_or(self.status.operation_start_timestamp)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            Error::serialization_for_kind(
                "Cluster",
                format!("invalid {} annotation: {}", OPERATION_LAST_OBSERVED_ANNOTATION, e),
            )
        })
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Whether `operation` is recorded on `cluster` and made no progress for longer than its timeout
pub fn is_operation_stalled(
    cluster: &Cluster,
    operation: Operation,
    now: DateTime<Utc>,
) -> Result<bool, Error> {
    let Some(record) = OperationRecord::from_cluster(cluster)? else {
        return Ok(false);
    };
    if record.status.operation != operation {
        return Ok(false);
    }
    let idle = now.signed_duration_since(record.last_progress());
    Ok(idle.num_seconds() > 0 && idle.num_seconds() as u64 > record.status.operation_timeout)
}

impl ClusterClient {
    /// Record that `operation` started now, with the given budget
    pub async fn patch_cluster_with_operation_started_status(
        &self,
        cluster: &str,
        namespace: &str,
        operation: Operation,
        timeout: Duration,
    ) -> Result<(), Error> {
        let now = Utc::now();
        let status = OperationStatus::new(operation, timeout, now);
        let encoded = serde_json::to_string(&status)
            .map_err(|e| Error::serialization_for_kind("Cluster", e.to_string()))?;

        let annotations = BTreeMap::from([
            (OPERATION_INFO_ANNOTATION.to_string(), encoded),
            (
                OPERATION_LAST_OBSERVED_ANNOTATION.to_string(),
                format_timestamp(now),
            ),
        ]);
        info!(cluster = %cluster, operation = %operation, timeout_secs = timeout.as_secs(), "recording operation start");
        self.patch_cluster_object_annotations(cluster, namespace, annotations)
            .await
    }

    /// Refresh the last-observed timestamp; failures are logged, not returned
    pub async fn mark_progress_observed(&self, cluster: &str, namespace: &str) {
        let annotations = BTreeMap::from([(
            OPERATION_LAST_OBSERVED_ANNOTATION.to_string(),
            format_timestamp(Utc::now()),
        )]);
        if let Err(e) = self
            .patch_cluster_object_annotations(cluster, namespace, annotations)
            .await
        {
            warn!(cluster = %cluster, error = %e, "failed to record observed progress");
        }
    }
}
