//! dt-server — coordinator process of the distributed traffic simulator.
//!
//! Loads a `SimConfig` (JSON), waits for `num_workers` workers to join,
//! sets them up, runs the configured protocol to termination, writes step
//! summaries and kills the workers.
//!
//! ```text
//! dt-server --config run.json                # console progress line
//! dt-server --config run.json --gui          # JSON step snapshots on stdout (`-gui` also works)
//! dt-server --local-workers 4                # co-host the workers as tasks
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use dt_coord::{AggregatedStep, ReportObserver, RunSummary, ServerCommand};
use dt_core::SimConfig;
use dt_mobility::LaneEngine;
use dt_net::{spawn_local_worker, Server, DEFAULT_PORT};
use dt_output::{CsvWriter, SummaryObserver};
use dt_proto::VehicleSnapshot;

/// Console progress line every this many steps.
const PROGRESS_INTERVAL: u64 = 100;
/// How long to wait for killed workers to disconnect.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "dt-server", about = "Distributed traffic simulation server")]
struct Cli {
    /// Visualization mode: print one JSON line per step with vehicle
    /// positions instead of the progress line.
    #[arg(long)]
    gui: bool,

    /// Run configuration (JSON).  Defaults to a small built-in grid run.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to accept workers on.
    #[arg(long, default_value_t = format!("0.0.0.0:{DEFAULT_PORT}"))]
    listen: String,

    /// Workers to host inside this process.
    #[arg(long, default_value_t = 0)]
    local_workers: usize,
}

// ── Observer ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SnapshotLine<'a> {
    step: u64,
    active: u64,
    finished: u64,
    vehicles: Vec<&'a VehicleSnapshot>,
}

/// Console (or GUI feed) plus optional CSV output.
struct RunObserver {
    gui: bool,
    csv: Option<SummaryObserver<CsvWriter>>,
    started: Instant,
}

impl ReportObserver for RunObserver {
    fn on_step_complete(&mut self, step: &AggregatedStep) {
        if let Some(csv) = self.csv.as_mut() {
            csv.on_step_complete(step);
        }
        if self.gui {
            let line = SnapshotLine {
                step: step.step.0,
                active: step.active_vehicles,
                finished: step.total_finished,
                vehicles: step.reports.iter().flat_map(|r| r.vehicles.iter()).collect(),
            };
            match serde_json::to_string(&line) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::warn!(error = %e, "snapshot encoding failed"),
            }
        } else if step.step.0 % PROGRESS_INTERVAL == 0 {
            println!(
                "step {:>7}  active {:>6}  pending {:>5}  finished {:>7}  [{:.1?}]",
                step.step.0,
                step.active_vehicles,
                step.pending_routes,
                step.total_finished,
                self.started.elapsed()
            );
        }
    }

    fn on_run_end(&mut self, summary: &RunSummary) {
        if let Some(csv) = self.csv.as_mut() {
            csv.on_run_end(summary);
            if let Some(e) = csv.take_error() {
                tracing::error!(error = %e, "step summaries incomplete");
            }
        }
    }
}

// ── main ──────────────────────────────────────────────────────────────────────

fn load_config(path: Option<&PathBuf>) -> Result<SimConfig> {
    let Some(path) = path else {
        return Ok(SimConfig::default());
    };
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let config: SimConfig =
        serde_json::from_reader(BufReader::new(file)).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // The historical single-dash spelling `-gui` is accepted too.
    let args = std::env::args_os().map(|a| if a == "-gui" { "--gui".into() } else { a });
    let cli = Cli::parse_from(args);
    let mut config = load_config(cli.config.as_ref())?;
    config.report_vehicles |= cli.gui;
    config.validate()?;
    let workers = config.num_workers;

    let csv = match &config.output_dir {
        Some(dir) => Some(SummaryObserver::new(CsvWriter::new(dir)?)),
        None => None,
    };
    if !cli.gui {
        println!("=== dt-server ===");
        println!(
            "Workers: {workers}  |  Mode: {:?}  |  Max steps: {}  |  Seed: {}",
            config.sync_mode, config.max_steps, config.seed
        );
    }

    let server = Server::bind(cli.listen.as_str(), config).await?;
    let handle = server.spawn(Box::new(RunObserver { gui: cli.gui, csv, started: Instant::now() }))?;
    let addr = handle.connect_addr();

    let local = cli.local_workers.min(workers);
    let hosted: Vec<_> = (0..local)
        .map(|i| spawn_local_worker(addr.to_string(), format!("local-{i}"), LaneEngine::new()))
        .collect();
    tracing::info!(%addr, local, remote = workers - local, "waiting for workers");

    let summary = handle.run_to_end(workers).await?;
    if !cli.gui {
        println!();
        println!(
            "Run ended at step {} ({}), {} vehicles finished",
            summary.final_step,
            summary.reason.as_str(),
            summary.total_finished
        );
    }

    handle.close();
    handle.command(ServerCommand::KillAll { shared_process: local == workers }).await?;
    let gone = tokio::time::timeout(SHUTDOWN_GRACE, handle.wait_until(|s| s.joined == 0)).await;
    if gone.is_err() {
        tracing::warn!(joined = handle.status().joined, "workers still connected at shutdown");
    }
    for task in hosted {
        match task.await {
            Ok(Ok(exit)) => tracing::debug!(?exit, "hosted worker ended"),
            Ok(Err(e)) => tracing::warn!(error = %e, "hosted worker failed"),
            Err(e) => tracing::warn!(error = %e, "hosted worker panicked"),
        }
    }
    Ok(())
}
