//! CLI commands

use clap::Args;

pub mod operation;
pub mod status;
pub mod wait;

/// Cluster addressed by a command
#[derive(Args, Debug, Clone)]
pub struct ClusterRef {
    /// Name of the Cluster object
    pub cluster: String,
}
