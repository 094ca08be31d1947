//! Basalt worker process.
//!
//! Spawned by the supervisor with its parameters on the command line.
//! Speaks the length-prefixed message protocol on stdin/stdout; all
//! logging goes to stderr because stdout is the IPC pipe.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use clap::Parser;

use basalt_core::ipc::{self, read_message, write_message};
use basalt_core::{Config, WorkerLoop};

#[derive(Parser)]
#[command(name = "basalt-worker")]
#[command(about = "Basalt worker process (spawned by the supervisor)")]
#[command(version)]
struct Args {
    /// Index of this worker within the pool
    #[arg(long)]
    worker_id: usize,

    /// Execution quantum in milliseconds
    #[arg(long, default_value = "10")]
    quantum_ms: u64,

    /// Logical memory pool capacity in bytes
    #[arg(long, default_value = "67108864")]
    memory_bytes: usize,

    /// Inbox poll interval in milliseconds
    #[arg(long, default_value = "50")]
    poll_ms: u64,

    /// Log level filter (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_new(&args.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = Config {
        quantum: Duration::from_millis(args.quantum_ms),
        memory_pool_bytes: args.memory_bytes,
        worker_poll_interval: Duration::from_millis(args.poll_ms),
        log_level: args.log_level.clone(),
        ..Config::default()
    };
    let mut worker = WorkerLoop::new(args.worker_id, &config);

    let (in_tx, in_rx) = mpsc::sync_channel(ipc::CHANNEL_CAPACITY);
    let (out_tx, out_rx) = mpsc::sync_channel(ipc::CHANNEL_CAPACITY);

    // stdin → inbox. Exits when the supervisor closes our stdin.
    let reader = thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let mut stdin = std::io::stdin();
            loop {
                match read_message(&mut stdin) {
                    Ok(msg) => {
                        if in_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "stdin closed");
                        break;
                    }
                }
            }
        })?;

    // outbox → stdout.
    let writer = thread::Builder::new()
        .name("stdout-writer".to_string())
        .spawn(move || {
            let mut stdout = std::io::stdout();
            for msg in out_rx {
                if let Err(e) = write_message(&mut stdout, &msg) {
                    tracing::error!(error = %e, "failed to write to stdout");
                    break;
                }
            }
        })?;

    worker.run(&in_rx, &out_tx)?;

    // Dropping the outbox sender lets the writer flush and exit. The
    // reader may still be blocked on stdin; process exit reaps it.
    drop(out_tx);
    let _ = writer.join();
    drop(reader);

    Ok(())
}
