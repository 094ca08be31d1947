//! Runtime configuration for the supervisor and workers.
//!
//! Configuration is an explicit immutable value constructed once at startup
//! and passed to [`Supervisor::start`](crate::supervisor::Supervisor::start).
//! Library code never reads ambient process state; the CLI is responsible
//! for mapping flags onto this struct.

use std::path::PathBuf;
use std::time::Duration;

/// Immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of worker processes to spawn.
    pub num_workers: usize,
    /// Advisory time budget per task execution. Exceeding it only
    /// increments the overrun counter; execution is never interrupted.
    pub quantum: Duration,
    /// Logical memory pool capacity per worker, in bytes.
    pub memory_pool_bytes: usize,
    /// Log verbosity, as a tracing filter directive (e.g. "info").
    pub log_level: String,
    /// Port for the Prometheus `/metrics` endpoint (0 = disabled).
    pub metrics_port: u16,
    /// Port for the `/healthz` and `/readyz` endpoints (0 = disabled).
    pub health_port: u16,
    /// Bound on IPC `send` before it fails with a timeout.
    pub ipc_send_timeout: Duration,
    /// How long a worker blocks waiting for inbound messages before
    /// giving the scheduler a turn.
    pub worker_poll_interval: Duration,
    /// Explicit path to the `basalt-worker` binary. When unset the
    /// supervisor falls back to the discovery chain (env var, exe dir,
    /// PATH, cargo target dir).
    pub worker_binary: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_workers: 4,
            quantum: Duration::from_millis(10),
            memory_pool_bytes: 64 * 1024 * 1024,
            log_level: "info".to_string(),
            metrics_port: 9100,
            health_port: 8080,
            ipc_send_timeout: Duration::from_secs(5),
            worker_poll_interval: Duration::from_millis(50),
            worker_binary: None,
        }
    }
}
