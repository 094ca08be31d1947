//! Basalt CLI - single-host task execution kernel.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};

use basalt_core::{Config, Supervisor, TaskSpec};
use basalt_server::AppState;

#[derive(Parser)]
#[command(name = "basalt")]
#[command(about = "Single-host task execution kernel")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the supervisor and worker pool
    Run {
        /// Number of worker processes
        #[arg(long, default_value = "4")]
        workers: usize,

        /// Execution quantum in milliseconds
        #[arg(long, default_value = "10")]
        quantum_ms: u64,

        /// Logical memory pool capacity per worker, in bytes
        #[arg(long, default_value = "67108864")]
        memory_bytes: usize,

        /// Metrics endpoint port (0 disables)
        #[arg(long, default_value = "9100")]
        metrics_port: u16,

        /// Health endpoint port (0 disables)
        #[arg(long, default_value = "8080")]
        health_port: u16,

        /// Log level filter (error, warn, info, debug, trace)
        #[arg(long, default_value = "info")]
        log_level: String,

        /// Explicit path to the basalt-worker binary
        #[arg(long)]
        worker_binary: Option<PathBuf>,

        /// JSON file with an array of task specs to submit, then exit
        /// once all results are in. Without it the kernel runs until
        /// Ctrl+C.
        #[arg(long)]
        tasks: Option<PathBuf>,

        /// Grace period for worker shutdown, in seconds
        #[arg(long, default_value = "10")]
        grace_secs: u64,

        /// How long to wait for batch results before giving up, in seconds
        #[arg(long, default_value = "60")]
        wait_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workers,
            quantum_ms,
            memory_bytes,
            metrics_port,
            health_port,
            log_level,
            worker_binary,
            tasks,
            grace_secs,
            wait_secs,
        } => {
            let filter = tracing_subscriber::EnvFilter::try_new(&log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();

            let config = Config {
                num_workers: workers,
                quantum: Duration::from_millis(quantum_ms),
                memory_pool_bytes: memory_bytes,
                log_level,
                metrics_port,
                health_port,
                worker_binary,
                ..Config::default()
            };
            let grace = Duration::from_secs(grace_secs);

            let supervisor = Supervisor::start(config.clone())?;

            let ready = Arc::new(supervisor.ready_check());
            if config.metrics_port != 0 {
                let state = Arc::new(AppState::new(ready.clone()));
                let port = config.metrics_port;
                tokio::spawn(async move {
                    if let Err(e) =
                        basalt_server::serve(port, basalt_server::create_router(state)).await
                    {
                        tracing::error!(error = %e, "metrics endpoint failed");
                    }
                });
            }
            if config.health_port != 0 && config.health_port != config.metrics_port {
                let state = Arc::new(AppState::new(ready));
                let port = config.health_port;
                tokio::spawn(async move {
                    if let Err(e) =
                        basalt_server::serve(port, basalt_server::create_router(state)).await
                    {
                        tracing::error!(error = %e, "health endpoint failed");
                    }
                });
            }

            match tasks {
                Some(path) => {
                    run_batch(supervisor, &path, Duration::from_secs(wait_secs), grace).await?
                }
                None => run_until_interrupted(supervisor, grace).await?,
            }
        }
    }

    Ok(())
}

/// Submit every spec from the file, wait for all results, print them as
/// JSON, and shut the pool down.
async fn run_batch(
    mut supervisor: Supervisor,
    path: &std::path::Path,
    wait: Duration,
    grace: Duration,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)?;
    let specs: Vec<TaskSpec> = serde_json::from_str(&text)?;
    let expected = specs.len();

    let summaries = tokio::task::spawn_blocking(move || {
        let mut collected = Vec::new();
        for spec in specs {
            match supervisor.submit_task(spec) {
                Ok(id) => tracing::info!(task_id = %id, "submitted"),
                Err(e) => tracing::error!(error = %e, "submission rejected"),
            }
        }

        let deadline = std::time::Instant::now() + wait;
        while collected.len() < expected && std::time::Instant::now() < deadline {
            collected.extend(supervisor.collect_results(Duration::from_millis(500)));
        }
        if collected.len() < expected {
            tracing::warn!(
                expected,
                collected = collected.len(),
                "gave up waiting for remaining results"
            );
        }

        supervisor.stop(grace);
        collected
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

/// Keep the pool alive, logging results as they arrive, until Ctrl+C.
async fn run_until_interrupted(
    mut supervisor: Supervisor,
    grace: Duration,
) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    let pool = tokio::task::spawn_blocking(move || {
        while !flag.load(Ordering::SeqCst) {
            for summary in supervisor.collect_results(Duration::from_millis(500)) {
                tracing::info!(
                    task_id = %summary.id,
                    owner = %summary.owner,
                    state = %summary.state,
                    "task finished"
                );
            }
        }
        supervisor.stop(grace);
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    shutdown.store(true, Ordering::SeqCst);
    pool.await?;
    Ok(())
}
