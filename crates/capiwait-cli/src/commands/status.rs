//! `capiwait status`: one snapshot of a cluster.

use std::fmt::Write;

use chrono::Utc;
use clap::Args;

use capiwait_client::capi::HasConditions;
use capiwait_client::{
    is_operation_stalled, ClusterClient, ClusterStatusInfo, Operation, OperationRecord,
    ReadinessPhase,
};
use capiwait_common::kube_utils::CONDITION_READY;

use super::ClusterRef;
use crate::Result;

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub cluster: ClusterRef,
}

/// Whether a recorded operation is stalled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationHealth {
    pub operation: Operation,
    pub stalled: bool,
}

/// Render a snapshot as aligned text lines
pub fn render(name: &str, info: &ClusterStatusInfo, health: Option<OperationHealth>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Cluster:        {}", name);
    let _ = writeln!(out, "Phase:          {}", ReadinessPhase::observe(info));

    if let Some(cluster) = info.cluster.as_ref() {
        let reason = cluster.reason(CONDITION_READY);
        if !reason.is_empty() {
            let _ = writeln!(out, "Ready reason:   {}", reason);
        }
    }
    if let Some(kcp) = info.control_plane.as_ref() {
        let r = kcp.replicas();
        let _ = writeln!(
            out,
            "Control plane:  {} desired={} ready={} updated={}",
            kcp.name(),
            r.desired,
            r.ready,
            r.updated
        );
    }
    for md in &info.machine_deployments {
        let r = md.replicas();
        let _ = writeln!(
            out,
            "Worker pool:    {} desired={} ready={} updated={}",
            md.name(),
            r.desired,
            r.ready,
            r.updated
        );
    }
    let _ = writeln!(
        out,
        "Machines:       {} control plane, {} worker",
        info.control_plane_machines.len(),
        info.worker_machines.len()
    );
    if let Some(h) = health {
        let state = if h.stalled { "stalled" } else { "in progress" };
        let _ = writeln!(out, "Operation:      {} ({})", h.operation, state);
    }
    if let Some(err) = info.retrieval_error.as_ref() {
        let _ = writeln!(out, "Read errors:    {}", err);
    }
    out
}

/// Run the status command.
pub async fn run(client: &ClusterClient, namespace: &str, args: StatusArgs) -> Result<()> {
    let name = args.cluster.cluster.as_str();
    let info = client.get_cluster_status_info(name, namespace, None).await;

    let health = match info.cluster.as_ref() {
        Some(cluster) => match OperationRecord::from_cluster(cluster)? {
            Some(record) => Some(OperationHealth {
                operation: record.status.operation,
                stalled: is_operation_stalled(cluster, record.status.operation, Utc::now())?,
            }),
            None => None,
        },
        None => None,
    };

    print!("{}", render(name, &info, health));
    Ok(())
}
