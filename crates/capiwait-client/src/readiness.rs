//! Cluster readiness waits
//!
//! Three waits of increasing strictness:
//!
//! * [`ClusterClient::wait_for_cluster_initialized`]: the kubeconfig secret can
//!   be fetched. Stall-detecting, aborts on a permanent failure.
//! * [`ClusterClient::wait_for_control_plane_available`]: the single control
//!   plane reports Available.
//! * [`ClusterClient::wait_for_cluster_ready`]: control plane and
//!   infrastructure are ready, optionally every replica converged, and every
//!   machine is bound to a node.

use std::fmt;

use tracing::info;

use capiwait_common::kube_utils::CONDITION_READY;
use capiwait_common::{AggregateError, Error};

use crate::capi::{Cluster, HasConditions, KubeadmControlPlane, Machine, MachineDeployment};
use crate::operation::Operation;
use crate::poll::{PollError, PollOptions};
use crate::stall::{cluster_state_changed, workers_state_changed};
use crate::status::ClusterStatusInfo;
use crate::watch::TransitionCheck;
use crate::ClusterClient;

/// Where a cluster stands on its way to Ready
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadinessPhase {
    /// Nothing observed yet
    #[default]
    Unknown,
    /// Waiting on the infrastructure provider
    InfrastructureProvisioning,
    /// Infrastructure is up, the first control plane machine is not
    ControlPlaneInitializing,
    /// Control plane answers, no worker pool observed yet
    ControlPlaneAvailable,
    /// Machines are being created or rolled
    ReplicasConverging,
    /// Every replica converged and every machine has a node
    Ready,
    /// The cluster reported a permanent failure
    Failed,
}

impl ReadinessPhase {
    /// Classify a snapshot
    pub fn observe(info: &ClusterStatusInfo) -> Self {
        let Some(cluster) = info.cluster.as_ref() else {
            return Self::Unknown;
        };
        if cluster.failed() {
            return Self::Failed;
        }
        if !cluster.infrastructure_ready() {
            return Self::InfrastructureProvisioning;
        }
        let available = info
            .control_plane
            .as_ref()
            .is_some_and(KubeadmControlPlane::available);
        if !cluster.control_plane_ready() || !available {
            return Self::ControlPlaneInitializing;
        }

        let no_workers_yet = info.machine_deployments.is_empty() && info.worker_machines.is_empty();
        if no_workers_yet && !info.is_single_node() {
            return Self::ControlPlaneAvailable;
        }

        let converged = info
            .control_plane
            .iter()
            .map(KubeadmControlPlane::replicas)
            .chain(info.machine_deployments.iter().map(MachineDeployment::replicas))
            .all(|r| r.converged());
        if converged && info.machines().all(Machine::has_node_ref) {
            Self::Ready
        } else {
            Self::ReplicasConverging
        }
    }
}

impl fmt::Display for ReadinessPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::InfrastructureProvisioning => "InfrastructureProvisioning",
            Self::ControlPlaneInitializing => "ControlPlaneInitializing",
            Self::ControlPlaneAvailable => "ControlPlaneAvailable",
            Self::ReplicasConverging => "ReplicasConverging",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

fn join_not_ready(errors: AggregateError) -> Result<(), Error> {
    match errors.into_option() {
        None => Ok(()),
        Some(agg) => Err(Error::not_ready(agg.to_string())),
    }
}

fn pending_stages(cluster: &Cluster) -> AggregateError {
    let reason = cluster.reason(CONDITION_READY);
    let mut errors = AggregateError::new();
    if !cluster.control_plane_ready() {
        errors.push(Error::not_ready(format!(
            "cluster control plane is still being initialized: {}",
            reason
        )));
    }
    if !cluster.infrastructure_ready() {
        errors.push(Error::not_ready(format!(
            "cluster infrastructure is still being provisioned: {}",
            reason
        )));
    }
    errors
}

/// Control plane and infrastructure are ready, or the aggregate Ready holds
///
/// Ready may fold in worker readiness, which does not matter for fetching a
/// kubeconfig, so it is accepted but not required.
pub fn verify_cluster_initialized(cluster: &Cluster) -> Result<(), Error> {
    if cluster.ready() {
        return Ok(());
    }
    join_not_ready(pending_stages(cluster))
}

/// Control plane and infrastructure are both ready
///
/// The aggregate Ready condition alone is not enough.
pub fn verify_cluster_ready(cluster: &Cluster) -> Result<(), Error> {
    join_not_ready(pending_stages(cluster))
}

/// Every control plane has its desired replicas ready and updated
pub fn verify_control_plane_replicas(items: &[KubeadmControlPlane]) -> Result<(), Error> {
    let errors = items
        .iter()
        .map(KubeadmControlPlane::replicas)
        .filter(|r| !r.converged())
        .map(|r| {
            Error::not_ready(format!(
                "control-plane is still creating replicas, DesiredReplicas={} Replicas={} ReadyReplicas={} UpdatedReplicas={}",
                r.desired, r.current, r.ready, r.updated
            ))
        })
        .collect();
    join_not_ready(errors)
}

/// Every worker pool has its desired replicas ready and updated
pub fn verify_machine_deployment_replicas(items: &[MachineDeployment]) -> Result<(), Error> {
    let errors = items
        .iter()
        .filter(|md| !md.replicas().converged())
        .map(|md| {
            let r = md.replicas();
            Error::not_ready(format!(
                "worker nodes are still being created for MachineDeployment '{}', DesiredReplicas={} Replicas={} ReadyReplicas={} UpdatedReplicas={}",
                md.name(), r.desired, r.current, r.ready, r.updated
            ))
        })
        .collect();
    join_not_ready(errors)
}

/// Every machine is bound to a node
pub fn verify_machines_ready(items: &[Machine]) -> Result<(), Error> {
    let errors = items
        .iter()
        .filter(|m| !m.has_node_ref())
        .map(|m| Error::not_ready(format!("machine {} is still being provisioned", m.name())))
        .collect();
    join_not_ready(errors)
}

/// Wait target of cluster creation
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterInitialized;

impl TransitionCheck for ClusterInitialized {
    fn operation(&self) -> Operation {
        Operation::Create
    }

    fn verify(&self, info: &ClusterStatusInfo) -> Result<(), Error> {
        match info.cluster.as_ref() {
            Some(cluster) => verify_cluster_initialized(cluster),
            None => Err(Error::not_ready("cluster object has not been read yet")),
        }
    }

    fn changed(&self, prev: &ClusterStatusInfo, curr: &ClusterStatusInfo) -> bool {
        cluster_state_changed(prev, curr) || workers_state_changed(prev, curr)
    }
}

impl ClusterClient {
    /// Wait until the cluster's kubeconfig can be fetched
    pub async fn wait_for_cluster_initialized(&self, cluster: &str, namespace: &str) -> Result<(), Error> {
        info!(cluster = %cluster, "waiting for cluster to be initialized");
        self.wait_for_transition(cluster, namespace, None, ClusterInitialized)
            .await
    }

    /// Wait until the single control plane of the cluster is Available
    ///
    /// Zero or several control planes abort immediately.
    pub async fn wait_for_control_plane_available(
        &self,
        cluster: &str,
        namespace: &str,
    ) -> Result<(), Error> {
        let timeout = self.config.operation_timeout;
        self.poller
            .poll_bounded(self.config.check_cluster_interval, timeout, move || async move {
                let kcp = self
                    .get_control_plane_for_cluster(cluster, namespace)
                    .await
                    .map_err(|e| match e {
                        Error::AmbiguousTopology { .. } => PollError::Terminal(e),
                        other => PollError::Transient(other),
                    })?;
                if kcp.available() {
                    return Ok(());
                }
                Err(PollError::Transient(Error::not_ready(
                    "control plane is not available yet",
                )))
            })
            .await
    }

    /// Wait until the cluster is ready for use
    ///
    /// Each stage is a bounded poll of its own; `check_all_replicas` adds the
    /// control plane and worker pool replica stages.
    pub async fn wait_for_cluster_ready(
        &self,
        cluster: &str,
        namespace: &str,
        check_all_replicas: bool,
    ) -> Result<(), Error> {
        let poll = Some(PollOptions::new(
            self.config.check_cluster_interval,
            self.config.operation_timeout,
        ));

        info!(cluster = %cluster, check_all_replicas, "waiting for cluster to be ready");
        let _: Cluster = self
            .get_resource_with(cluster, namespace, verify_cluster_ready, poll)
            .await?;

        if check_all_replicas {
            let _: Vec<KubeadmControlPlane> = self
                .list_cluster_resources(cluster, namespace, verify_control_plane_replicas, poll)
                .await?;
            let _: Vec<MachineDeployment> = self
                .list_cluster_resources(cluster, namespace, verify_machine_deployment_replicas, poll)
                .await?;
        }

        let _: Vec<Machine> = self
            .list_cluster_resources(cluster, namespace, verify_machines_ready, poll)
            .await?;
        info!(cluster = %cluster, "cluster is ready");
        Ok(())
    }
}
