//! Worker pool supervisor.
//!
//! Owns the worker process lifecycle and the caller-facing API:
//! `submit_task` routes submissions round-robin across the pool,
//! `collect_results` drains completion summaries, and `stop` (also run on
//! drop, so every exit path tears the pool down) broadcasts `SHUTDOWN`
//! and force-terminates stragglers after the grace period.
//!
//! Workers are spawned as clean processes: no inherited mutable state,
//! each constructs its own scheduler and memory pool. The only state
//! crossing the process boundary is the message pipes.

use std::collections::HashMap;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, IpcError, Result};
use crate::ipc::{self, Message, MessageKind, SenderId, read_message, write_message};
use crate::metrics::METRICS;
use crate::task::{Task, TaskSpec, TaskState, TaskSummary};

/// Environment fallback for locating the worker binary when
/// `Config.worker_binary` is unset.
pub const WORKER_PATH_ENV: &str = "BASALT_WORKER_PATH";

const SHUTDOWN_SEND_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// Handle to one worker process: the child itself plus the writer and
/// reader threads bridging its stdio pipes to message channels.
struct WorkerHandle {
    id: usize,
    child: Child,
    /// Bounded queue feeding the writer thread. `None` once shutdown has
    /// begun (dropping it lets the writer exit).
    tx: Option<SyncSender<Message>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    /// Cleared by the reader thread when the worker's stdout closes.
    alive: Arc<AtomicBool>,
    reaped: bool,
}

impl WorkerHandle {
    /// Spawn a worker process and verify it with a heartbeat handshake
    /// before handing its pipes to the bridge threads.
    fn spawn(id: usize, config: &Config, results: mpsc::Sender<Message>) -> Result<Self> {
        let binary = find_worker_binary(config)?;

        let mut child = Command::new(&binary)
            .arg("--worker-id")
            .arg(id.to_string())
            .arg("--quantum-ms")
            .arg(config.quantum.as_millis().to_string())
            .arg("--memory-bytes")
            .arg(config.memory_pool_bytes.to_string())
            .arg("--poll-ms")
            .arg(config.worker_poll_interval.as_millis().to_string())
            .arg("--log-level")
            .arg(&config.log_level)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // worker logs go to our stderr
            .spawn()
            .map_err(|e| {
                Error::Supervisor(format!(
                    "failed to spawn worker process '{}': {e}",
                    binary.display()
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Supervisor("failed to get worker stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Supervisor("failed to get worker stdout".to_string()))?;
        let mut stdin = BufWriter::new(stdin);
        let mut stdout = BufReader::new(stdout);

        write_message(&mut stdin, &Message::heartbeat(SenderId::Supervisor))?;
        let reply = read_message(&mut stdout)?;
        if !matches!(reply.kind, MessageKind::Heartbeat) {
            return Err(Error::Supervisor(format!(
                "unexpected handshake reply from worker {id}: {:?}",
                reply.kind
            )));
        }

        let (tx, rx) = mpsc::sync_channel::<Message>(ipc::CHANNEL_CAPACITY);

        let writer = thread::Builder::new()
            .name(format!("basalt-writer-{id}"))
            .spawn(move || {
                for msg in rx {
                    if let Err(e) = write_message(&mut stdin, &msg) {
                        tracing::debug!(worker = id, error = %e, "worker stdin closed");
                        break;
                    }
                }
            })
            .map_err(|e| Error::Supervisor(format!("failed to start writer thread: {e}")))?;

        let alive = Arc::new(AtomicBool::new(true));
        let reader_alive = alive.clone();
        let reader = thread::Builder::new()
            .name(format!("basalt-reader-{id}"))
            .spawn(move || {
                loop {
                    match read_message(&mut stdout) {
                        Ok(msg) => {
                            if results.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(worker = id, error = %e, "worker stdout closed");
                            break;
                        }
                    }
                }
                reader_alive.store(false, Ordering::SeqCst);
            })
            .map_err(|e| Error::Supervisor(format!("failed to start reader thread: {e}")))?;

        tracing::info!(worker = id, pid = child.id(), "worker spawned");

        Ok(Self {
            id,
            child,
            tx: Some(tx),
            writer: Some(writer),
            reader: Some(reader),
            alive,
            reaped: false,
        })
    }

    fn send(&self, msg: Message, timeout: Duration) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or(IpcError::WorkerDown(self.id))?;
        ipc::send(tx, msg, timeout)
    }

    fn is_alive(&self) -> bool {
        !self.reaped && self.alive.load(Ordering::SeqCst)
    }

    /// Wait for the worker to exit on its own until `deadline`, then
    /// force-terminate it. Always reaps the child and bridge threads.
    fn join(&mut self, deadline: Instant) {
        self.tx.take();
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(worker = self.id, %status, "worker exited");
                    break;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            worker = self.id,
                            pid = self.child.id(),
                            "worker did not stop within grace period; terminating"
                        );
                        if let Err(e) = self.child.kill() {
                            tracing::warn!(worker = self.id, error = %e, "failed to kill worker");
                        }
                        let _ = self.child.wait();
                        break;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    tracing::warn!(worker = self.id, error = %e, "failed to poll worker");
                    break;
                }
            }
        }
        self.reaped = true;
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

struct Outstanding {
    owner: String,
    worker: usize,
}

/// Multi-process worker pool manager and caller-facing API.
pub struct Supervisor {
    config: Config,
    workers: Vec<WorkerHandle>,
    results: Receiver<Message>,
    next_worker: AtomicUsize,
    /// Submitted tasks with no collected result yet: id → (owner, worker).
    /// Powers the "exactly one summary per submitted id" contract and the
    /// crash policy for workers that die mid-task.
    outstanding: Mutex<HashMap<Uuid, Outstanding>>,
    stopped: bool,
}

impl Supervisor {
    /// Spawn the configured number of worker processes.
    pub fn start(config: Config) -> Result<Self> {
        if config.num_workers == 0 {
            return Err(Error::Supervisor("num_workers must be at least 1".into()));
        }

        let (results_tx, results) = mpsc::channel();
        let mut workers = Vec::with_capacity(config.num_workers);
        for id in 0..config.num_workers {
            workers.push(WorkerHandle::spawn(id, &config, results_tx.clone())?);
        }

        tracing::info!(num_workers = config.num_workers, "supervisor started");
        Ok(Self {
            config,
            workers,
            results,
            next_worker: AtomicUsize::new(0),
            outstanding: Mutex::new(HashMap::new()),
            stopped: false,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate a submission, assign it an id, and route it to a live
    /// worker (round-robin).
    ///
    /// Fails synchronously on validation errors and on IPC send timeout;
    /// neither is retried internally.
    pub fn submit_task(&self, spec: TaskSpec) -> Result<Uuid> {
        if self.stopped {
            return Err(Error::Supervisor("supervisor is stopped".into()));
        }
        spec.validate()?;

        let task = Task::from_spec(spec);
        let id = task.meta.id;
        let owner = task.meta.owner.clone();

        let count = self.workers.len();
        let worker = (0..count)
            .map(|_| self.next_worker.fetch_add(1, Ordering::Relaxed) % count)
            .find(|i| self.workers[*i].is_alive())
            .ok_or_else(|| Error::Supervisor("no live workers".into()))?;

        self.workers[worker].send(
            Message::task_submit(SenderId::Supervisor, task),
            self.config.ipc_send_timeout,
        )?;

        self.outstanding
            .lock()
            .unwrap()
            .insert(id, Outstanding { owner, worker });
        METRICS.tasks_submitted.inc();
        tracing::debug!(task_id = %id, worker, "task submitted");
        Ok(id)
    }

    /// Drain available task results for up to `timeout`.
    ///
    /// Returns whatever summaries arrived; partial collection is normal
    /// and never an error — call again to continue draining. Tasks that
    /// were in flight on a worker that died are reported as `FAILED` with
    /// a synthesized `last_error`.
    pub fn collect_results(&self, timeout: Duration) -> Vec<TaskSummary> {
        let deadline = Instant::now() + timeout;
        let mut collected = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.results.recv_timeout(remaining) {
                Ok(msg) => settle_message(&self.outstanding, msg, &mut collected),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let dead: Vec<usize> = self
            .workers
            .iter()
            .enumerate()
            .filter(|(_, w)| !w.is_alive())
            .map(|(idx, _)| idx)
            .collect();
        drain_and_settle(&self.results, &self.outstanding, &dead, &mut collected);
        collected
    }

    /// Number of workers whose pipes are still open.
    pub fn alive_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_alive()).count()
    }

    /// Readiness probe closure for the health endpoint: true while the
    /// whole pool is up.
    pub fn ready_check(&self) -> impl Fn() -> bool + Send + Sync + use<> {
        let flags: Vec<Arc<AtomicBool>> = self.workers.iter().map(|w| w.alive.clone()).collect();
        move || flags.iter().all(|flag| flag.load(Ordering::SeqCst))
    }

    /// Broadcast `SHUTDOWN`, wait up to `grace` for workers to stop, and
    /// force-terminate any that do not.
    pub fn stop(&mut self, grace: Duration) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        for worker in &self.workers {
            if let Err(e) = worker.send(Message::shutdown(SenderId::Supervisor), SHUTDOWN_SEND_TIMEOUT)
            {
                tracing::warn!(worker = worker.id, error = %e, "failed to deliver shutdown");
            }
        }

        let deadline = Instant::now() + grace;
        for worker in &mut self.workers {
            worker.join(deadline);
        }
        tracing::info!("supervisor stopped");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop(DEFAULT_GRACE);
    }
}

/// Fold one worker message into the collection, keeping the outstanding
/// table and the counters in sync.
fn settle_message(
    outstanding: &Mutex<HashMap<Uuid, Outstanding>>,
    msg: Message,
    collected: &mut Vec<TaskSummary>,
) {
    match msg.kind {
        MessageKind::TaskResult(summary) => {
            outstanding.lock().unwrap().remove(&summary.id);
            match summary.state {
                TaskState::Done => METRICS.tasks_completed.inc(),
                TaskState::Failed => METRICS.tasks_failed.inc(),
                TaskState::Cancelled => METRICS.tasks_cancelled.inc(),
                _ => {}
            }
            collected.push(summary);
        }
        MessageKind::Heartbeat => {
            tracing::trace!(sender = %msg.sender, "heartbeat");
        }
        other => {
            tracing::warn!(sender = %msg.sender, kind = ?other, "unexpected message from worker");
        }
    }
}

/// Crash policy: a worker that exited takes its in-flight tasks with it.
/// Report those tasks as failed; the pool keeps running on the surviving
/// workers, and the dead worker is not respawned.
///
/// A result the reader thread forwarded before the worker died wins over
/// a synthesized failure, so the channel is drained once more before any
/// orphaned task is reported. Without that drain a task could get both a
/// genuine and a synthesized summary across consecutive collect calls.
fn drain_and_settle(
    results: &Receiver<Message>,
    outstanding: &Mutex<HashMap<Uuid, Outstanding>>,
    dead_workers: &[usize],
    collected: &mut Vec<TaskSummary>,
) {
    while let Ok(msg) = results.try_recv() {
        settle_message(outstanding, msg, collected);
    }

    let mut outstanding = outstanding.lock().unwrap();
    for &idx in dead_workers {
        let orphaned: Vec<Uuid> = outstanding
            .iter()
            .filter(|(_, o)| o.worker == idx)
            .map(|(id, _)| *id)
            .collect();
        for id in orphaned {
            let entry = outstanding.remove(&id).expect("entry just listed");
            tracing::error!(worker = idx, task_id = %id, "worker exited with task in flight");
            METRICS.tasks_failed.inc();
            collected.push(TaskSummary {
                id,
                owner: entry.owner,
                state: TaskState::Failed,
                last_error: Some(format!("worker {idx} exited during execution")),
            });
        }
    }
}

fn worker_binary_name() -> &'static str {
    if cfg!(windows) {
        "basalt-worker.exe"
    } else {
        "basalt-worker"
    }
}

/// Locate the `basalt-worker` binary.
///
/// Order: explicit config path, `BASALT_WORKER_PATH`, next to the current
/// executable, system PATH, then the cargo target directory (development
/// builds and tests).
fn find_worker_binary(config: &Config) -> Result<PathBuf> {
    if let Some(path) = &config.worker_binary {
        if path.exists() {
            return Ok(path.clone());
        }
        return Err(Error::Supervisor(format!(
            "configured worker binary '{}' does not exist",
            path.display()
        )));
    }

    if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Ok(exe_path) = std::env::current_exe()
        && let Some(exe_dir) = exe_path.parent()
    {
        let candidate = exe_dir.join(worker_binary_name());
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    if let Ok(path) = which::which(worker_binary_name()) {
        return Ok(path);
    }

    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        for profile in ["debug", "release"] {
            let path = PathBuf::from(&manifest_dir)
                .join("..")
                .join("..")
                .join("target")
                .join(profile)
                .join(worker_binary_name());
            if path.exists() {
                return Ok(path.canonicalize().unwrap_or(path));
            }
        }
    }

    Err(Error::Supervisor(format!(
        "could not find {} binary; set Config.worker_binary or {}",
        worker_binary_name(),
        WORKER_PATH_ENV
    )))
}
