//! Per-client wait configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use capiwait_common::Error;

/// Default budget for one create/upgrade operation
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Tick interval of the stall-detecting waits
pub const DEFAULT_STALL_POLL_INTERVAL: Duration = Duration::from_secs(15);
/// Tick interval for cluster-level bounded waits
pub const DEFAULT_CHECK_CLUSTER_INTERVAL: Duration = Duration::from_secs(10);
/// Tick interval for single-resource bounded waits
pub const DEFAULT_CHECK_RESOURCE_INTERVAL: Duration = Duration::from_secs(5);
/// Delay before the first upgrade tick
pub const DEFAULT_UPGRADE_START_DELAY: Duration = Duration::from_secs(60);

/// Tunables shared by every wait of one [`ClusterClient`](crate::ClusterClient)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterClientConfig {
    /// Budget for one operation; also the stall threshold
    #[serde(with = "duration_secs")]
    pub operation_timeout: Duration,
    /// Tick interval of the stall-detecting waits
    #[serde(with = "duration_secs")]
    pub stall_poll_interval: Duration,
    /// Tick interval for cluster-level bounded waits
    #[serde(with = "duration_secs")]
    pub check_cluster_interval: Duration,
    /// Tick interval for single-resource bounded waits
    #[serde(with = "duration_secs")]
    pub check_resource_interval: Duration,
    /// Hard ceiling as a multiple of `operation_timeout`
    pub max_timeout_factor: u32,
    /// Delay before the first upgrade tick, so controllers can flip conditions
    #[serde(with = "duration_secs")]
    pub upgrade_start_delay: Duration,
    /// Treat zero worker machines as an upgraded worker set
    pub single_node_clusters: bool,
    /// Suffix of the secret holding a cluster's kubeconfig (`<cluster>-<suffix>`)
    pub kubeconfig_secret_suffix: String,
    /// Key of the kubeconfig inside that secret
    pub kubeconfig_secret_key: String,
}

impl Default for ClusterClientConfig {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            stall_poll_interval: DEFAULT_STALL_POLL_INTERVAL,
            check_cluster_interval: DEFAULT_CHECK_CLUSTER_INTERVAL,
            check_resource_interval: DEFAULT_CHECK_RESOURCE_INTERVAL,
            max_timeout_factor: 3,
            upgrade_start_delay: DEFAULT_UPGRADE_START_DELAY,
            single_node_clusters: false,
            kubeconfig_secret_suffix: "kubeconfig".to_string(),
            kubeconfig_secret_key: "value".to_string(),
        }
    }
}

impl ClusterClientConfig {
    /// Set the operation timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Enable or disable the single-node-cluster carve-out
    pub fn with_single_node_clusters(mut self, enabled: bool) -> Self {
        self.single_node_clusters = enabled;
        self
    }

    /// Hard ceiling of the stall-detecting waits
    pub fn max_timeout(&self) -> Duration {
        self.operation_timeout.saturating_mul(self.max_timeout_factor)
    }

    /// Reject settings the poll loops cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        let intervals = [
            ("stallPollInterval", self.stall_poll_interval),
            ("checkClusterInterval", self.check_cluster_interval),
            ("checkResourceInterval", self.check_resource_interval),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::validation(format!("{} must be greater than zero", name)));
        }
        if self.operation_timeout.is_zero() {
            return Err(Error::validation("operationTimeout must be greater than zero"));
        }
        if self.max_timeout_factor == 0 {
            return Err(Error::validation("maxTimeoutFactor must be at least 1"));
        }
        if self
            .operation_timeout
            .checked_mul(self.max_timeout_factor)
            .is_none()
        {
            return Err(Error::validation(
                "operationTimeout times maxTimeoutFactor does not fit in a duration",
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
