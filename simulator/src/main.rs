//! FxBroker Simulator
//!
//! Runs a broker, its participants and a notary in one process and drives
//! exchanges between them, either from a scenario or at random.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cluster;
mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use scenario::Scenario;

/// FxBroker Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "In-process FX broker network simulator")]
struct Args {
    /// Built-in scenario to run
    #[arg(short, long)]
    scenario: Option<String>,

    /// JSON scenario file to run
    #[arg(long, conflicts_with = "scenario")]
    scenario_file: Option<PathBuf>,

    /// List built-in scenarios and exit
    #[arg(long)]
    list: bool,

    /// Random exchanges to run when no scenario is given
    #[arg(short, long, default_value = "10")]
    exchanges: usize,

    /// Random exchanges run concurrently
    #[arg(long, default_value = "4")]
    concurrency: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(args.json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    if args.list {
        for name in Scenario::builtin_names() {
            println!("{}", name);
        }
        return Ok(());
    }

    info!("Starting FxBroker Simulator");

    let mut controller = SimulationController::new(args.seed);

    let scenario = match (&args.scenario, &args.scenario_file) {
        (Some(name), _) => Some(Scenario::load(name)?),
        (None, Some(path)) => Some(Scenario::from_file(path)?),
        (None, None) => None,
    };

    match scenario {
        Some(scenario) => {
            controller.run_scenario(&scenario).await?;
            info!(
                "Scenario {} passed with {} exchanges",
                scenario.name,
                controller.outcomes().len()
            );
        }
        None => {
            info!(
                "Running {} random exchanges, {} at a time",
                args.exchanges, args.concurrency
            );
            controller.run_random(args.exchanges, args.concurrency).await?;
        }
    }

    // Print metrics
    let metrics = controller.metrics();
    info!("Simulation complete");
    info!("Total exchanges: {}", metrics.total_exchanges);
    info!("Successful: {}", metrics.successful_exchanges);
    info!("Failed: {}", metrics.failed_exchanges);
    for (code, count) in metrics.failures_by_code() {
        info!("  {}: {}", code, count);
    }
    info!("Success rate: {:.2}", metrics.success_rate());
    for (outcome, latency) in metrics.latency_by_outcome() {
        info!(
            "{} latency: mean {}ms, p99 {}ms, max {}ms over {}",
            outcome, latency.mean_ms, latency.p99_ms, latency.max_ms, latency.count
        );
    }

    Ok(())
}
