//! Target allocator service.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ta_allocator::{
    allocation::{
        new_strategy,
        topology::{NodeTopology, StaticTopology},
        Allocator,
    },
    collector::{CollectorInstance, CollectorWatcher},
    config::{self, Config},
    metrics::Metrics,
    prehook,
    target::{Discoverer, EventSource, TargetSets},
};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Distributes scrape targets across a collector fleet.
#[derive(Debug, Parser)]
#[command(name = "target-allocator", version)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, env = "TA_CONFIG_FILE", default_value = config::DEFAULT_CONFIG_FILE_PATH)]
    config_file: PathBuf,

    /// Log level, overriding the configuration file.
    #[arg(long, env = "TA_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load(&args.config_file)?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // Initialize tracing (prefer RUST_LOG, fallback to configured level)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting target allocator");
    info!(
        config_file = %args.config_file.display(),
        strategy = %config.allocation_strategy,
        filter = %config.filter_strategy,
        "Configuration loaded"
    );

    let topology: Arc<dyn NodeTopology> = Arc::new(StaticTopology::new(config.node_zones.clone()));
    let strategy = new_strategy(
        &config.allocation_strategy,
        &config.strategy_options(Some(topology)),
    )
    .context("failed to build allocation strategy")?;

    let metrics = Arc::new(Metrics::default());
    let allocator = Arc::new(Allocator::with_metrics(strategy, Arc::clone(&metrics)));

    let mut discoverer = Discoverer::new(Arc::clone(&allocator), config.discoverer_config());
    if let Some(hook) = prehook::new_filter(&config.filter_strategy)? {
        discoverer = discoverer.with_hook(hook);
    }
    discoverer
        .apply_config(EventSource::ConfigFile, config.scrape_configs.clone())
        .context("failed to apply scrape configs")?;
    let discoverer = Arc::new(discoverer);

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Static configuration stands in for service discovery and the fleet
    // watch; both feed the same channels a live source would.
    let (tsets_tx, tsets_rx) = mpsc::channel::<TargetSets>(1);
    let tsets: TargetSets = config
        .scrape_configs
        .iter()
        .map(|scrape| (scrape.job_name.clone(), scrape.static_target_groups()))
        .collect();
    tsets_tx
        .send(tsets)
        .await
        .context("target discoverer channel closed")?;

    let fleet: Vec<CollectorInstance> = config
        .collectors
        .iter()
        .map(|c| CollectorInstance {
            name: c.name.clone(),
            node_name: c.node.clone(),
            running: true,
            ready: true,
            not_ready_since: None,
        })
        .collect();
    let (_fleet_tx, fleet_rx) = watch::channel(fleet);

    let discoverer_handle = tokio::spawn({
        let discoverer = Arc::clone(&discoverer);
        let shutdown_rx = shutdown_rx.clone();
        async move {
            discoverer.run(tsets_rx, shutdown_rx).await;
        }
    });

    let watcher = CollectorWatcher::new(Arc::clone(&allocator), config.watcher_config());
    let watcher_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            watcher.run(fleet_rx, shutdown_rx).await;
        }
    });

    let summary_handle = tokio::spawn(log_summaries(
        Arc::clone(&allocator),
        Duration::from_secs(config.reload_interval_secs.max(1)),
        shutdown_rx,
    ));

    // Wait for shutdown signal (Ctrl+C)
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    // Signal all workers to stop
    let _ = shutdown_tx.send(true);
    drop(tsets_tx);

    let shutdown_timeout = Duration::from_secs(10);
    let joined = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(discoverer_handle, watcher_handle, summary_handle);
    })
    .await;
    if joined.is_err() {
        warn!("Workers did not stop within timeout");
    }

    info!("Target allocator stopped");
    Ok(())
}

/// Log the per-collector allocation whenever it changed.
async fn log_summaries(
    allocator: Arc<Allocator>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    let mut last: HashMap<String, usize> = HashMap::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current: HashMap<String, usize> = allocator
                    .collectors()
                    .into_values()
                    .map(|c| (c.name, c.num_targets))
                    .collect();
                if current != last {
                    let snapshot = allocator.metrics().snapshot();
                    for (collector, targets) in &snapshot.targets_per_collector {
                        info!(collector = %collector, targets, "Allocation");
                    }
                    info!(
                        collectors = snapshot.collectors_allocatable,
                        targets_kept = snapshot.targets_kept,
                        unassigned = snapshot.targets_unassigned,
                        "Allocation summary"
                    );
                    last = current;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
