//! capiwait CLI library

pub mod commands;
pub mod config;
pub mod error;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use capiwait_client::ClusterClient;
use capiwait_common::telemetry::LogFormat;

pub use error::{Error, Result};

/// capiwait - wait on Cluster API cluster creation and upgrades
#[derive(Parser, Debug)]
#[command(name = "capiwait")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Management cluster kubeconfig (falls back to CAPIWAIT_KUBECONFIG, then kube defaults)
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace of the cluster (defaults to the kubeconfig context namespace)
    #[arg(short, long, global = true, default_value = "")]
    pub namespace: String,

    /// JSON file with wait tunables
    #[arg(long, global = true, env = "CAPIWAIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Budget of one operation, e.g. 30m
    #[arg(long, global = true, env = "CAPIWAIT_OPERATION_TIMEOUT", value_parser = config::parse_duration)]
    pub operation_timeout: Option<Duration>,

    /// Treat clusters without worker machines as having upgraded workers
    #[arg(long, global = true, env = "CAPIWAIT_SINGLE_NODE_CLUSTERS")]
    pub single_node_clusters: bool,

    /// Log output format: text or json
    #[arg(long, global = true, env = "CAPIWAIT_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Wait for a cluster to reach a state
    Wait(commands::wait::WaitArgs),
    /// Show where a cluster stands
    Status(commands::status::StatusArgs),
    /// Record that an operation started on a cluster
    MarkOperation(commands::operation::MarkOperationArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let client = connect(&self.global).await?;
        let namespace = self.global.namespace.as_str();
        match self.command {
            Commands::Wait(args) => commands::wait::run(&client, namespace, args).await,
            Commands::Status(args) => commands::status::run(&client, namespace, args).await,
            Commands::MarkOperation(args) => {
                commands::operation::run(&client, namespace, args).await
            }
        }
    }
}

async fn connect(global: &GlobalArgs) -> Result<ClusterClient> {
    let config = config::client_config(global)?;
    let kubeconfig = config::resolve_kubeconfig(global.kubeconfig.as_deref());
    Ok(ClusterClient::connect(kubeconfig.as_deref(), config).await?)
}
