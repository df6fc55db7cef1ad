//! `capiwait wait`: block until a cluster reaches a state.
//!
//! # Usage
//!
//! ```bash
//! # Kubeconfig secret can be read
//! capiwait wait initialized prod -n tkg-system
//!
//! # Every replica converged and every machine has a node
//! capiwait wait ready prod --all-replicas
//!
//! # Control plane nodes run the new version
//! capiwait wait upgrade-control-plane prod --version v1.30.2+vmware.1
//! ```

use std::sync::Arc;

use clap::{Args, Subcommand};
use tracing::info;

use capiwait_client::{ClusterClient, KubeBackend};

use super::ClusterRef;
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct WaitArgs {
    #[command(subcommand)]
    pub target: WaitTarget,
}

#[derive(Subcommand, Debug)]
pub enum WaitTarget {
    /// The cluster's kubeconfig can be fetched
    Initialized(ClusterRef),
    /// The control plane reports Available
    ControlPlane(ClusterRef),
    /// Control plane and infrastructure ready, every machine bound to a node
    Ready {
        #[command(flatten)]
        cluster: ClusterRef,
        /// Also wait for every control plane and worker replica to converge
        #[arg(long)]
        all_replicas: bool,
    },
    /// The Cluster object is gone
    Deleted(ClusterRef),
    /// Control plane nodes run the given Kubernetes version
    UpgradeControlPlane(UpgradeArgs),
    /// Worker nodes run the given Kubernetes version
    UpgradeWorkers(UpgradeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct UpgradeArgs {
    #[command(flatten)]
    pub cluster: ClusterRef,

    /// Target Kubernetes version
    #[arg(long)]
    pub version: String,

    /// Do not query the workload cluster API server for its version
    #[arg(long)]
    pub skip_server_version: bool,
}

async fn workload(
    client: &ClusterClient,
    namespace: &str,
    args: &UpgradeArgs,
) -> Result<Option<Arc<dyn KubeBackend>>> {
    if args.version.trim().is_empty() {
        return Err(Error::invalid_argument("--version must not be empty"));
    }
    if args.skip_server_version {
        return Ok(None);
    }
    Ok(Some(client.workload_backend(&args.cluster.cluster, namespace).await?))
}

/// Run the wait command.
pub async fn run(client: &ClusterClient, namespace: &str, args: WaitArgs) -> Result<()> {
    match args.target {
        WaitTarget::Initialized(c) => {
            client.wait_for_cluster_initialized(&c.cluster, namespace).await?
        }
        WaitTarget::ControlPlane(c) => {
            client
                .wait_for_control_plane_available(&c.cluster, namespace)
                .await?
        }
        WaitTarget::Ready {
            cluster,
            all_replicas,
        } => {
            client
                .wait_for_cluster_ready(&cluster.cluster, namespace, all_replicas)
                .await?
        }
        WaitTarget::Deleted(c) => client.wait_for_cluster_deletion(&c.cluster, namespace).await?,
        WaitTarget::UpgradeControlPlane(u) => {
            let backend = workload(client, namespace, &u).await?;
            client
                .wait_for_control_plane_upgrade(&u.cluster.cluster, namespace, &u.version, backend.as_deref())
                .await?
        }
        WaitTarget::UpgradeWorkers(u) => {
            let backend = workload(client, namespace, &u).await?;
            client
                .wait_for_worker_upgrade(&u.cluster.cluster, namespace, &u.version, backend.as_deref())
                .await?
        }
    }
    info!("wait complete");
    Ok(())
}
