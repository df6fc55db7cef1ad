//! capiwait
//!
//! Blocks until a Cluster API cluster is created, ready or upgraded, printing
//! nothing on success and the reason on failure.

use clap::Parser;

use capiwait_cli::Cli;
use capiwait_common::telemetry::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.global.log_format) {
        eprintln!("error: {}", e);
        std::process::exit(2);
    }

    if let Err(e) = cli.run().await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
