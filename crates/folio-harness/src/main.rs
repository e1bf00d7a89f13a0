//! Folio simulation binary.
//!
//! Runs seeded chaos scenarios against the real hub on a paused clock and
//! reports invariant violations.
//!
//! # Usage
//!
//! ```bash
//! # 100 seeds starting at 0
//! folio-sim --seeds 100
//!
//! # Replay one seed with debug logging
//! folio-sim --start-seed 42 --seeds 1 --log-level debug
//! ```

use std::{process::ExitCode, time::Duration};

use clap::Parser;
use folio_client::ClientConfig;
use folio_harness::ChaosScenario;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Folio notification client soak simulator
#[derive(Parser, Debug)]
#[command(name = "folio-sim")]
#[command(about = "Chaos simulation for the Folio notification subscription manager")]
#[command(version)]
struct Args {
    /// First seed to run
    #[arg(long, default_value = "0")]
    start_seed: u64,

    /// Number of consecutive seeds
    #[arg(long, default_value = "20")]
    seeds: u64,

    /// Operations per scenario
    #[arg(long, default_value = "200")]
    steps: usize,

    /// Distinct users per scenario
    #[arg(long, default_value = "3")]
    users: u8,

    /// Reconnect budget per cycle
    #[arg(long, default_value = "2")]
    max_reconnects: u32,

    /// Base reconnect delay in seconds
    #[arg(long, default_value = "3")]
    reconnect_delay_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = ClientConfig::default();
    config.supervisor.max_reconnect_attempts = args.max_reconnects;
    config.supervisor.reconnect_base_delay = Duration::from_secs(args.reconnect_delay_secs);

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_time().start_paused(true).build()?;

    let mut failed = 0u64;
    for seed in args.start_seed..args.start_seed.saturating_add(args.seeds) {
        let scenario =
            ChaosScenario { seed, steps: args.steps, users: args.users, config: config.clone() };
        let report = runtime.block_on(scenario.run())?;

        if !report.is_clean() {
            failed += 1;
            for (step, violation) in &report.violations {
                tracing::error!(seed, step, %violation, "invariant violation");
            }
        }
    }

    tracing::info!(seeds = args.seeds, failed, "simulation complete");
    Ok(if failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
