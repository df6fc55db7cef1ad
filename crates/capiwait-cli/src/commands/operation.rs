//! `capiwait mark-operation`: record that a create or upgrade started.
//!
//! Writes the operation record and a fresh last-observed timestamp onto the
//! Cluster object, so `capiwait status` can later tell a slow rollout from a
//! stalled one.

use clap::Args;

use capiwait_client::{ClusterClient, Operation};

use super::ClusterRef;
use crate::Result;

#[derive(Args, Debug)]
pub struct MarkOperationArgs {
    #[command(flatten)]
    pub cluster: ClusterRef,

    /// Operation that started: create or upgrade
    #[arg(long, value_parser = parse_operation)]
    pub operation: Operation,
}

fn parse_operation(raw: &str) -> std::result::Result<Operation, String> {
    raw.parse::<Operation>().map_err(|e| e.to_string())
}

/// Run the mark-operation command.
pub async fn run(client: &ClusterClient, namespace: &str, args: MarkOperationArgs) -> Result<()> {
    let timeout = client.config().operation_timeout;
    client
        .patch_cluster_with_operation_started_status(
            &args.cluster.cluster,
            namespace,
            args.operation,
            timeout,
        )
        .await?;
    Ok(())
}
