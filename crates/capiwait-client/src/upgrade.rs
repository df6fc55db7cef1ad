//! Kubernetes version upgrade waits
//!
//! Control plane and worker upgrades share the stall-detecting driver and
//! differ only in their [`TransitionCheck`].

use serde_json::json;
use tracing::info;

use capiwait_common::kube_utils::CONDITION_CONTROL_PLANE_READY;
use capiwait_common::Error;

use crate::backend::{KubeBackend, PatchBody};
use crate::capi::{HasConditions, KubeadmControlPlane, MachineDeployment};
use crate::operation::Operation;
use crate::stall::{control_plane_state_changed, workers_state_changed};
use crate::status::ClusterStatusInfo;
use crate::watch::TransitionCheck;
use crate::ClusterClient;

/// Control plane nodes run the target version
#[derive(Debug, Clone)]
pub struct ControlPlaneUpgrade {
    /// Target version, e.g. "v1.30.2+vmware.1"
    pub target: String,
}

impl TransitionCheck for ControlPlaneUpgrade {
    fn operation(&self) -> Operation {
        Operation::Upgrade
    }

    fn verify(&self, info: &ClusterStatusInfo) -> Result<(), Error> {
        let Some(cluster) = info.cluster.as_ref() else {
            return Err(Error::not_ready("cluster object has not been read yet"));
        };
        if !cluster.is_true(CONDITION_CONTROL_PLANE_READY) {
            return Err(Error::not_ready(format!(
                "control-plane is still being upgraded, reason:'{}', message:'{}'",
                cluster.reason(CONDITION_CONTROL_PLANE_READY),
                cluster.message(CONDITION_CONTROL_PLANE_READY)
            )));
        }
        match info.kubernetes_version.as_deref() {
            Some(current) if !current.is_empty() && current != self.target => {
                Err(Error::not_ready(format!(
                    "waiting for kubernetes version update, current kubernetes version {} but expecting {}",
                    current, self.target
                )))
            }
            _ => Ok(()),
        }
    }

    fn changed(&self, prev: &ClusterStatusInfo, curr: &ClusterStatusInfo) -> bool {
        control_plane_state_changed(prev, curr)
    }
}

/// Every worker pool rolled out and every worker machine runs the target version
#[derive(Debug, Clone)]
pub struct WorkerUpgrade {
    /// Target version
    pub target: String,
    /// Clusters without workers count as upgraded
    pub single_node_clusters: bool,
}

impl TransitionCheck for WorkerUpgrade {
    fn operation(&self) -> Operation {
        Operation::Upgrade
    }

    fn verify(&self, info: &ClusterStatusInfo) -> Result<(), Error> {
        if self.single_node_clusters && info.worker_machines.is_empty() {
            return Ok(());
        }

        let rolling: Vec<String> = info
            .machine_deployments
            .iter()
            .filter(|md| !md.replicas().fully_rolled_out())
            .map(|md| {
                let r = md.replicas();
                format!(
                    "worker nodes are still being upgraded for MachineDeployment '{}', DesiredReplicas={} Replicas={} ReadyReplicas={} UpdatedReplicas={}",
                    md.name(), r.desired, r.current, r.ready, r.updated
                )
            })
            .collect();
        match rolling.as_slice() {
            [] => {}
            [one] => return Err(Error::not_ready(one.clone())),
            many => return Err(Error::not_ready(format!("[{}]", many.join(", ")))),
        }

        // Machine versions may omit the distribution suffix of the target.
        let mut behind: Vec<&str> = info
            .worker_machines
            .values()
            .filter(|m| {
                m.spec
                    .version
                    .as_deref()
                    .filter(|v| !v.is_empty())
                    .map_or(true, |v| !self.target.starts_with(v))
            })
            .map(|m| m.name())
            .collect();
        if behind.is_empty() {
            return Ok(());
        }
        behind.sort_unstable();
        Err(Error::not_ready(format!(
            "worker machines [{}] are still not upgraded",
            behind.join(" ")
        )))
    }

    fn changed(&self, prev: &ClusterStatusInfo, curr: &ClusterStatusInfo) -> bool {
        workers_state_changed(prev, curr)
    }
}

impl ClusterClient {
    /// Wait for the control plane nodes to run `version`
    ///
    /// `workload` is the workload cluster's API server; when given its
    /// reported version must match too.
    pub async fn wait_for_control_plane_upgrade(
        &self,
        cluster: &str,
        namespace: &str,
        version: &str,
        workload: Option<&dyn KubeBackend>,
    ) -> Result<(), Error> {
        let check = ControlPlaneUpgrade {
            target: version.to_string(),
        };
        self.wait_for_upgrade(cluster, namespace, workload, check)
            .await
    }

    /// Wait for the worker nodes to run `version`
    pub async fn wait_for_worker_upgrade(
        &self,
        cluster: &str,
        namespace: &str,
        version: &str,
        workload: Option<&dyn KubeBackend>,
    ) -> Result<(), Error> {
        let check = WorkerUpgrade {
            target: version.to_string(),
            single_node_clusters: self.config.single_node_clusters,
        };
        self.wait_for_upgrade(cluster, namespace, workload, check)
            .await
    }

    /// Stall-detecting upgrade wait with a caller-provided check
    ///
    /// Starts with a fixed delay: right after the version bump the controllers
    /// still report the pre-upgrade Ready conditions.
    pub async fn wait_for_upgrade<C: TransitionCheck>(
        &self,
        cluster: &str,
        namespace: &str,
        workload: Option<&dyn KubeBackend>,
        check: C,
    ) -> Result<(), Error> {
        let delay = self.config.upgrade_start_delay;
        info!(cluster = %cluster, delay_secs = delay.as_secs(), "waiting for upgrade to start rolling out");
        self.poller.sleep(delay).await;
        self.wait_for_transition(cluster, namespace, workload, check)
            .await
    }

    /// Set the Kubernetes version of a control plane
    pub async fn upgrade_control_plane_version(
        &self,
        name: &str,
        namespace: &str,
        version: &str,
    ) -> Result<(), Error> {
        info!(control_plane = %name, version = %version, "updating control plane version");
        let patch = PatchBody::Merge(json!({ "spec": { "version": version } }));
        self.patch_resource::<KubeadmControlPlane>(name, namespace, patch, None)
            .await
            .map_err(|e| e.context("unable to update the control plane version"))
    }

    /// Set the Kubernetes version of a worker pool's machine template
    pub async fn upgrade_machine_deployment_version(
        &self,
        name: &str,
        namespace: &str,
        version: &str,
    ) -> Result<(), Error> {
        info!(machine_deployment = %name, version = %version, "updating worker pool version");
        let patch = PatchBody::Merge(json!({
            "spec": { "template": { "spec": { "version": version } } }
        }));
        self.patch_resource::<MachineDeployment>(name, namespace, patch, None)
            .await
            .map_err(|e| e.context("unable to update the worker pool version"))
    }
}
