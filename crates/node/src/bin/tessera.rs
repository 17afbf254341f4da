//! Tessera validator node
//!
//! # Usage
//!
//! ```bash
//! # Lay out the topology and run the tiles with nothing to execute
//! tessera --config tessera.toml run
//!
//! # Run the transactions of a feed file (see `Feed`)
//! tessera --config tessera.toml run --feed feed.toml
//!
//! # Print the memory layout without starting anything
//! tessera --config tessera.toml mem
//!
//! # Log to a file at debug level
//! tessera --config tessera.toml --log-level debug --logfile /var/log/tessera.log run
//! ```
//!
//! # Configuration
//!
//! See `NodeConfig` for all options. Example TOML:
//!
//! ```toml
//! [layout]
//! affinity = "auto"
//! exec_tile_count = 4
//! verify_tile_count = 2
//!
//! [dedup]
//! signature_cache_size = 4194302
//!
//! [exec]
//! spad_mb = 128
//! max_live_slots = 512
//!
//! [funk]
//! max_account_records = 1048576
//! max_txns = 1024
//!
//! [hugetlbfs]
//! huge_page_threshold_mib = 16
//! gigantic_page_threshold_mib = 2048
//!
//! [checkpoint]
//! path = "/var/lib/tessera/layout.toml"
//!
//! [log]
//! level = "info"
//! ```

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tessera_node::{
    build_topology, describe, finish_options, save_checkpoint, spawn_signal_watcher, spawn_tiles,
    Feed, LogRecorder, NodeConfig, NodeError,
};
use tessera_topo::{Topo, TopoRuntime};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Interval at which the main thread checks for signals and dead tiles.
const WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between counter summaries in the log.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(10);

/// Tessera validator node
///
/// Lays out the validator's shared-memory topology and runs its tiles.
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Log level filter (overrides config; RUST_LOG overrides both)
    #[arg(long)]
    log_level: Option<String>,

    /// Path to log file (redirects all logs to this file)
    #[arg(long)]
    logfile: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node until interrupted or a tile fails
    Run {
        /// Transactions and funded accounts to execute (TOML)
        #[arg(long)]
        feed: Option<PathBuf>,
    },
    /// Print the workspace, tile and link layout
    Mem,
}

fn init_logging(config: &NodeConfig) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let builder = tracing_subscriber::fmt();
    let filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    if let Some(log_file) = &config.log.path {
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let file_name = log_file
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Invalid log file name"))?
            .to_string_lossy()
            .to_string();
        let directory = log_file
            .parent()
            .unwrap_or(std::path::Path::new("."))
            .to_path_buf();

        let file_appender = tracing_appender::rolling::never(directory, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        builder
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_env_filter(filter())
            .init();
        Ok(Some(guard))
    } else {
        builder.with_env_filter(filter()).init();
        Ok(None)
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = NodeConfig::load(&cli.config)?;
    config.apply_overrides(cli.log_level.as_deref(), cli.logfile.as_deref());
    let _log_guard = init_logging(&config)?;
    let recorder = LogRecorder::new();
    recorder.install();

    let cpu_cnt = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let opts = finish_options(&config, cpu_cnt).context("Failed to load layout checkpoint")?;
    let topo = build_topology(&config, &opts).context("Failed to build topology")?;

    match cli.command {
        Command::Mem => {
            print!("{}", describe(&topo));
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { feed } => {
            let feed = match feed {
                Some(path) => Feed::load(&path)?,
                None => Feed::default(),
            };
            run(&config, topo, &feed, &recorder)
        }
    }
}

fn run(config: &NodeConfig, topo: Topo, feed: &Feed, recorder: &LogRecorder) -> Result<ExitCode> {
    info!(
        tiles = topo.tiles().len(),
        links = topo.links().len(),
        footprint = topo.total_footprint(),
        "Tessera starting..."
    );
    if let Some(path) = &config.checkpoint.path {
        save_checkpoint(&topo, path).context("Failed to write layout checkpoint")?;
    }

    let rt = TopoRuntime::new(topo).context("Failed to allocate workspaces")?;
    let shutdown = Arc::new(AtomicBool::new(false));
    let watcher =
        spawn_signal_watcher(Arc::clone(&shutdown)).context("Failed to install signal handlers")?;
    let halt = Arc::new(AtomicBool::new(false));
    let threads = spawn_tiles(&rt, &halt, feed)?;

    let mut last_summary = Instant::now();
    while !shutdown.load(Ordering::Acquire) {
        if threads.iter().any(|t| t.is_finished()) {
            shutdown.store(true, Ordering::Release);
            break;
        }
        if last_summary.elapsed() >= SUMMARY_INTERVAL {
            recorder.log_summary();
            last_summary = Instant::now();
        }
        std::thread::sleep(WATCH_INTERVAL);
    }
    info!("Shutting down");
    halt.store(true, Ordering::Release);
    if watcher.join().is_err() {
        error!("signal watcher panicked");
    }

    let mut failed = false;
    for thread in threads {
        let (name, kind_id) = (thread.name(), thread.kind_id());
        if let Err(e) = thread.join() {
            // Run loop errors were already logged by the run loop.
            if !matches!(e, NodeError::Stem(_)) {
                error!(tile = name, kind_id, error = %e, "tile terminated");
            }
            failed = true;
        }
    }

    recorder.log_summary();
    if failed {
        return Ok(ExitCode::FAILURE);
    }
    info!("Tessera stopped");
    Ok(ExitCode::SUCCESS)
}
