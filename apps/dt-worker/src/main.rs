//! dt-worker — worker process of the distributed traffic simulator.
//!
//! Joins the server, simulates the area it is assigned with the reference
//! lane engine, exchanges border traffic with its fellows and exits when
//! the server kills it.

use anyhow::Result;
use clap::Parser;

use dt_mobility::LaneEngine;
use dt_net::{run_worker, WorkerExit, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "dt-worker", about = "Distributed traffic simulation worker")]
struct Cli {
    /// Server to join.
    #[arg(default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    server_addr: String,

    /// Name to join under.  Defaults to `worker-<pid>`.
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let name = cli.name.unwrap_or_else(|| format!("worker-{}", std::process::id()));

    match run_worker(&cli.server_addr, name, LaneEngine::new()).await? {
        WorkerExit::Killed { .. } => tracing::info!("killed by server"),
        WorkerExit::ServerClosed => tracing::warn!("server went away"),
    }
    Ok(())
}
