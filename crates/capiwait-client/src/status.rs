//! Cluster status aggregation
//!
//! One call issues every read needed to judge a cluster's progress and folds
//! all read failures into a single [`AggregateError`] instead of stopping at
//! the first one.

use std::collections::BTreeMap;

use tracing::trace;

use capiwait_common::kube_utils::{HasApiResource, CONDITION_READY};
use capiwait_common::{AggregateError, Error};

use crate::backend::KubeBackend;
use crate::capi::{Cluster, HasConditions, KubeadmControlPlane, Machine, MachineDeployment};
use crate::operation::Operation;
use crate::resource::no_verify;
use crate::ClusterClient;

/// Point-in-time view of a cluster and the objects composing it
///
/// Machine maps are keyed by `name-phase`, so a machine changing phase shows
/// up as a new key rather than a modified entry.
#[derive(Debug, Default)]
pub struct ClusterStatusInfo {
    /// Version reported by the workload cluster API server, when a handle was given
    pub kubernetes_version: Option<String>,
    /// The `Cluster` object
    pub cluster: Option<Cluster>,
    /// The single control plane of the cluster
    pub control_plane: Option<KubeadmControlPlane>,
    /// Control plane machines by `name-phase`
    pub control_plane_machines: BTreeMap<String, Machine>,
    /// Worker machines by `name-phase`
    pub worker_machines: BTreeMap<String, Machine>,
    /// Worker pools; left empty for single-node clusters
    pub machine_deployments: Vec<MachineDeployment>,
    /// Every read failure of this snapshot
    pub retrieval_error: Option<AggregateError>,
}

impl ClusterStatusInfo {
    /// Exactly one control plane machine and no workers
    pub fn is_single_node(&self) -> bool {
        self.control_plane_machines.len() == 1 && self.worker_machines.is_empty()
    }

    /// Nothing was read and nothing failed
    pub fn is_zero(&self) -> bool {
        self.kubernetes_version.is_none()
            && self.cluster.is_none()
            && self.control_plane.is_none()
            && self.control_plane_machines.is_empty()
            && self.worker_machines.is_empty()
            && self.machine_deployments.is_empty()
            && self.retrieval_error.is_none()
    }

    /// All reads succeeded
    pub fn is_complete(&self) -> bool {
        self.retrieval_error.is_none()
    }

    /// The cluster reports a failure that more waiting cannot fix
    pub fn permanent_failure(&self, operation: Operation) -> Option<Error> {
        let cluster = self.cluster.as_ref()?;
        if !cluster.failed() {
            return None;
        }
        Some(Error::permanent_failure(
            operation.description(),
            cluster.reason(CONDITION_READY),
            cluster.message(CONDITION_READY),
        ))
    }

    /// Take the retrieval error out as a plain error
    pub fn take_retrieval_error(&mut self) -> Option<Error> {
        self.retrieval_error.take().map(Error::Retrieval)
    }

    /// Every machine of the cluster, control plane first
    pub fn machines(&self) -> impl Iterator<Item = &Machine> {
        self.control_plane_machines
            .values()
            .chain(self.worker_machines.values())
    }
}

/// Split machines into control plane and workers, keyed by `name-phase`
pub fn partition_machines(
    machines: Vec<Machine>,
) -> (BTreeMap<String, Machine>, BTreeMap<String, Machine>) {
    let mut control_plane = BTreeMap::new();
    let mut workers = BTreeMap::new();
    for machine in machines {
        let key = machine.snapshot_key();
        if machine.is_control_plane() {
            control_plane.insert(key, machine);
        } else {
            workers.insert(key, machine);
        }
    }
    (control_plane, workers)
}

impl ClusterClient {
    /// The single `KubeadmControlPlane` of a cluster
    ///
    /// Zero or several matches is an [`Error::AmbiguousTopology`].
    pub async fn get_control_plane_for_cluster(
        &self,
        cluster: &str,
        namespace: &str,
    ) -> Result<KubeadmControlPlane, Error> {
        let mut items: Vec<KubeadmControlPlane> = self
            .list_cluster_resources(cluster, namespace, no_verify::<[KubeadmControlPlane]>, None)
            .await?;
        if items.len() != 1 {
            return Err(Error::ambiguous_topology(
                KubeadmControlPlane::KIND,
                cluster,
                self.resolve_namespace(namespace),
                items.len(),
            ));
        }
        Ok(items.remove(0))
    }

    /// Worker pools of a cluster; an empty list is an error
    pub async fn get_machine_deployments_for_cluster(
        &self,
        cluster: &str,
        namespace: &str,
    ) -> Result<Vec<MachineDeployment>, Error> {
        let items: Vec<MachineDeployment> = self
            .list_cluster_resources(cluster, namespace, no_verify::<[MachineDeployment]>, None)
            .await?;
        if items.is_empty() {
            return Err(Error::not_ready(
                "no MachineDeployment objects found for the given cluster",
            ));
        }
        Ok(items)
    }

    /// Machines of a cluster, split into control plane and workers
    pub async fn get_machines_for_cluster(
        &self,
        cluster: &str,
        namespace: &str,
    ) -> Result<(BTreeMap<String, Machine>, BTreeMap<String, Machine>), Error> {
        let machines: Vec<Machine> = self
            .list_cluster_resources(cluster, namespace, no_verify::<[Machine]>, None)
            .await?;
        Ok(partition_machines(machines))
    }

    /// Build one snapshot of a cluster
    ///
    /// The version, cluster, control plane and machine reads run concurrently.
    /// The worker pool read follows, and is skipped for single-node clusters.
    /// Never fails: read errors end up in `retrieval_error`.
    pub async fn get_cluster_status_info(
        &self,
        cluster: &str,
        namespace: &str,
        workload: Option<&dyn KubeBackend>,
    ) -> ClusterStatusInfo {
        let version = async {
            match workload {
                Some(backend) => Some(backend.server_version().await),
                None => None,
            }
        };
        let (version, cluster_obj, control_plane, machines) = tokio::join!(
            version,
            self.get_resource::<Cluster>(cluster, namespace, None),
            self.get_control_plane_for_cluster(cluster, namespace),
            self.get_machines_for_cluster(cluster, namespace),
        );

        let mut errors = AggregateError::new();
        let mut info = ClusterStatusInfo::default();

        match version {
            Some(Ok(v)) => info.kubernetes_version = Some(v),
            Some(Err(e)) => errors.push(e),
            None => {}
        }
        match cluster_obj {
            Ok(c) => info.cluster = Some(c),
            Err(e) => errors.push(e),
        }
        match control_plane {
            Ok(kcp) => info.control_plane = Some(kcp),
            Err(e) => errors.push(e),
        }
        match machines {
            Ok((cp, workers)) => {
                info.control_plane_machines = cp;
                info.worker_machines = workers;
            }
            Err(e) => errors.push(e),
        }

        if info.is_single_node() {
            trace!(cluster = %cluster, "single-node cluster, skipping MachineDeployment read");
        } else {
            match self.get_machine_deployments_for_cluster(cluster, namespace).await {
                Ok(mds) => info.machine_deployments = mds,
                Err(e) => errors.push(e),
            }
        }

        info.retrieval_error = errors.into_option();
        info
    }
}
