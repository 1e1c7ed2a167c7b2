//! fuelslice CLI entry point.
//!
//! Loads the partitions listed in a TOML config file, runs the fuel-sliced
//! scheduler until it goes idle, hits its cycle limit, or receives Ctrl-C,
//! then prints a per-partition summary.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fuelslice_common::ConfigFile;
use fuelslice_core::InstanceRunner;
use fuelslice_host::create_runner;
use fuelslice_sched::{FuelManager, RunSummary, Scheduler};

/// Run sandboxed WebAssembly partitions under a fuel-sliced cooperative
/// scheduler.
#[derive(Debug, Parser)]
#[command(name = "fuelslice", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "FUELSLICE_CONFIG")]
    config: PathBuf,

    /// Stop after this many scheduling cycles. Overrides the config file.
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,fuelslice=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    info!("Starting fuelslice");

    let config = ConfigFile::from_file(&cli.config)
        .with_context(|| format!("Failed to load config '{}'", cli.config.display()))?;
    let limit = cli.max_cycles.or(config.runtime.scheduler.max_cycles);

    info!(
        partitions = config.partitions.len(),
        max_partitions = config.runtime.scheduler.max_partitions,
        ?limit,
        "Configuration loaded"
    );

    let runner = create_runner(&config.runtime).context("Failed to create execution engine")?;
    let mut scheduler = Scheduler::new(runner, &config.runtime.scheduler)?;

    for entry in &config.partitions {
        // A partition that fails to load is skipped; the others still run
        if let Err(e) = scheduler.load_file(entry) {
            error!(partition_id = entry.id, error = %e, class = ?e.class(), "Failed to load partition");
            continue;
        }

        let manager = FuelManager::for_entry(entry, &config.runtime.fuel);
        scheduler
            .inject_fuel(entry.id, manager)
            .with_context(|| format!("Failed to inject fuel into partition {}", entry.id))?;
    }

    if scheduler.registry().is_empty() {
        warn!("No partition loaded");
    }

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping after the current slice");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let (scheduler, summary) = tokio::task::spawn_blocking(move || {
        let summary = scheduler.run(limit, &cancel);
        (scheduler, summary)
    })
    .await
    .context("Scheduler thread panicked")?;

    print_summary(&scheduler, &summary);

    let released = scheduler.shutdown();
    info!(released, "Shutdown complete");

    Ok(())
}

fn print_summary(scheduler: &Scheduler<InstanceRunner>, summary: &RunSummary) {
    println!(
        "{} cycles ({} yields, {} completions, {} failures), stopped: {:?}",
        summary.cycles, summary.yields, summary.completions, summary.failures, summary.stop_reason
    );

    for partition in scheduler.registry().iter() {
        let stats = partition.stats();
        let result = partition.pending_result().map_or_else(
            || "-".to_string(),
            |values| {
                values
                    .iter()
                    .map(|value| format!("{value}:{}", value.type_name()))
                    .collect::<Vec<_>>()
                    .join(", ")
            },
        );
        let fuel_used = scheduler
            .fuel_report(partition.id())
            .ok()
            .flatten()
            .map_or_else(|| "n/a".to_string(), |report| report.used.to_string());

        println!(
            "partition {}: result [{}], fuel used {}, slices {}, yields {}, completions {}, failures {}{}",
            partition.id(),
            result,
            fuel_used,
            stats.slices,
            stats.yields,
            stats.completions,
            stats.failures,
            if partition.is_retired() { ", retired" } else { "" },
        );
    }
}
