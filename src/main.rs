use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use scanstream::config::Config;
use scanstream::pipeline::Pipeline;
use scanstream::sink::checkpoint::FileCheckpointStore;
use scanstream::sink::http::HttpStoreWriter;
use scanstream::sink::BufferedBatchSink;
use scanstream::source::EventSource;

/// Streaming telemetry to time-series ingestion pipeline.
#[derive(Parser)]
#[command(name = "scanstream", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("scanstream {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    // Config is required for the pipeline run.
    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting scanstream");

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    let cancel = CancellationToken::new();

    // Set up signal handling.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("received SIGINT, shutting down");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                }
            }

            cancel.cancel();
        });
    }

    // One pipeline instance: this process owns a single partition.
    let writer = HttpStoreWriter::new(&cfg.store).context("building store writer")?;
    let sink = BufferedBatchSink::new(
        writer,
        cfg.store.database.clone(),
        cfg.store.table.clone(),
        cfg.store.batch_size,
    );
    let mut pipeline = Pipeline::new(sink);

    let mut checkpoint = cfg.checkpoint.path.clone().map(FileCheckpointStore::new);
    if let Some(store) = checkpoint.as_mut() {
        pipeline
            .restore(store)
            .context("restoring pending records from checkpoint")?;
        if pipeline.buffered() > 0 {
            info!(records = pipeline.buffered(), "restored pending records");
        }
    }

    let (tx, mut rx) = mpsc::channel::<String>(1_024);
    let source = EventSource::new(cfg.source.clone());
    let source_task = tokio::spawn(source.run(tx, cancel.clone()));

    // Stands in for the host runtime's periodic checkpoint signal.
    let mut snapshot_ticker = tokio::time::interval(cfg.checkpoint.interval);
    snapshot_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    snapshot_ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => {
                match event {
                    Some(raw) => pipeline.handle_event(&raw).await,
                    None => break, // input exhausted
                }
            }
            _ = snapshot_ticker.tick() => {
                if let Some(store) = checkpoint.as_mut() {
                    if let Err(err) = pipeline.snapshot(store) {
                        warn!(error = %err, "checkpoint snapshot failed");
                    }
                }
            }
        }
    }

    // Drain what is still buffered, then mirror the (now empty) buffer so
    // a restart does not resend delivered records.
    pipeline.flush_remaining().await;
    if let Some(store) = checkpoint.as_mut() {
        pipeline.snapshot(store).context("final checkpoint snapshot")?;
    }

    match source_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "event source failed"),
        Err(err) => warn!(error = %err, "event source task panicked"),
    }

    info!("scanstream stopped");

    Ok(())
}
