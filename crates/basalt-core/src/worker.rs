//! Per-process worker execution engine.
//!
//! The loop is transport-agnostic: it speaks [`Message`] over plain
//! `std::sync::mpsc` endpoints, and the `basalt-worker` binary bridges
//! those to stdin/stdout frames. That keeps the state machine testable
//! without spawning processes.
//!
//! State machine: `Starting → Idle ⇄ Executing → Idle … → Stopping →
//! Stopped`. Execution is run-to-completion; a task failure (error or
//! panic inside the agent) is caught and recorded on the task, never
//! crashing the worker.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::{Duration, Instant, SystemTime};

use crate::agent::{Agent, AgentRegistry, MemoryContext};
use crate::config::Config;
use crate::error::{Error, IpcError, Result};
use crate::ipc::{Message, MessageKind, SenderId};
use crate::memory::MemoryPool;
use crate::metrics::METRICS;
use crate::sched::Scheduler;
use crate::task::{Task, TaskState};

/// Lifecycle of one worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Idle,
    Executing,
    Stopping,
    Stopped,
}

enum Flow {
    Continue,
    Stop,
}

/// The per-process event loop: drains inbound messages into the
/// scheduler, executes tasks against the memory pool, emits results.
pub struct WorkerLoop {
    id: usize,
    sched: Scheduler,
    pool: MemoryPool,
    agents: AgentRegistry,
    state: WorkerState,
    poll_interval: Duration,
}

impl WorkerLoop {
    /// Construct the worker's own scheduler and memory pool. Neither is
    /// ever shared with another worker.
    pub fn new(id: usize, config: &Config) -> Self {
        Self {
            id,
            sched: Scheduler::new(config.quantum),
            pool: MemoryPool::new(config.memory_pool_bytes),
            agents: AgentRegistry::builtin(),
            state: WorkerState::Starting,
            poll_interval: config.worker_poll_interval,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Install an additional agent alongside the built-ins.
    pub fn register_agent(&mut self, agent: Box<dyn Agent>) {
        self.agents.register(agent);
    }

    /// Run until a `Shutdown` message arrives or the inbound channel
    /// closes. Alternates between draining the inbox and giving the
    /// scheduler a turn.
    pub fn run(&mut self, inbox: &Receiver<Message>, outbox: &SyncSender<Message>) -> Result<()> {
        tracing::info!(worker = self.id, "worker started");
        self.state = WorkerState::Idle;

        'main: loop {
            match inbox.recv_timeout(self.poll_interval) {
                Ok(msg) => {
                    if let Flow::Stop = self.handle_message(msg, outbox)? {
                        break 'main;
                    }
                    // Drain the backlog before executing so a batch of
                    // submissions is scheduled as one set.
                    loop {
                        match inbox.try_recv() {
                            Ok(msg) => {
                                if let Flow::Stop = self.handle_message(msg, outbox)? {
                                    break 'main;
                                }
                            }
                            Err(TryRecvError::Empty) => break,
                            Err(TryRecvError::Disconnected) => break 'main,
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!(worker = self.id, "inbound channel closed");
                    break 'main;
                }
            }
            self.run_next(outbox)?;
        }

        self.state = WorkerState::Stopping;
        self.cancel_queued(outbox)?;
        self.state = WorkerState::Stopped;
        tracing::info!(worker = self.id, "worker stopped");
        Ok(())
    }

    fn handle_message(&mut self, msg: Message, outbox: &SyncSender<Message>) -> Result<Flow> {
        match msg.kind {
            MessageKind::TaskSubmit(task) => {
                METRICS.tasks_submitted.inc();
                self.sched.enqueue(*task);
                Ok(Flow::Continue)
            }
            MessageKind::Heartbeat => {
                self.emit(outbox, Message::heartbeat(SenderId::Worker(self.id)))?;
                Ok(Flow::Continue)
            }
            MessageKind::Shutdown => {
                tracing::info!(worker = self.id, "shutdown requested");
                Ok(Flow::Stop)
            }
            MessageKind::TaskResult(summary) => {
                tracing::warn!(
                    worker = self.id,
                    task_id = %summary.id,
                    "unexpected TASK_RESULT on worker inbox"
                );
                Ok(Flow::Continue)
            }
        }
    }

    /// Ask the scheduler for the next task and deal with it: cancelled
    /// tasks only get their result emitted, runnable ones execute.
    fn run_next(&mut self, outbox: &SyncSender<Message>) -> Result<()> {
        let Some(mut task) = self.sched.next(SystemTime::now()) else {
            return Ok(());
        };

        if task.state() == TaskState::Cancelled {
            self.emit(
                outbox,
                Message::task_result(SenderId::Worker(self.id), task.summary()),
            )?;
            return Ok(());
        }

        self.state = WorkerState::Executing;
        task.set_state(TaskState::Running);
        tracing::debug!(
            worker = self.id,
            task_id = %task.meta.id,
            agent = %task.payload.agent,
            "task started"
        );

        let started = Instant::now();
        self.execute(&mut task);
        self.sched.record_execution(task.meta.id, started.elapsed());

        METRICS.memory_used_bytes.set(self.pool.used_bytes() as u64);
        METRICS
            .memory_allocation_count
            .set(self.pool.allocation_count() as u64);

        self.emit(
            outbox,
            Message::task_result(SenderId::Worker(self.id), task.summary()),
        )?;
        self.state = WorkerState::Idle;
        Ok(())
    }

    /// Run the task's agent to completion, converting errors and panics
    /// into task-level failures.
    fn execute(&mut self, task: &mut Task) {
        let Some(agent) = self.agents.get(&task.payload.agent) else {
            METRICS.tasks_failed.inc();
            tracing::error!(
                task_id = %task.meta.id,
                agent = %task.payload.agent,
                "unknown agent"
            );
            task.fail(Error::UnknownAgent(task.payload.agent.clone()).to_string());
            return;
        };

        let mut ctx = MemoryContext::new(&mut self.pool, &task.meta.owner);
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| agent.run(&task.payload.input, &mut ctx)));
        for handle in ctx.into_live_handles() {
            self.pool.reclaim(handle);
        }

        match outcome {
            Ok(Ok(output)) => {
                METRICS.tasks_completed.inc();
                task.set_state(TaskState::Done);
                tracing::debug!(
                    task_id = %task.meta.id,
                    output_len = output.len(),
                    "task done"
                );
            }
            Ok(Err(err)) => {
                METRICS.tasks_failed.inc();
                tracing::error!(task_id = %task.meta.id, error = %err, "task failed");
                task.fail(err.to_string());
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                METRICS.tasks_failed.inc();
                tracing::error!(task_id = %task.meta.id, panic = %message, "agent panicked");
                task.fail(format!("agent panicked: {message}"));
            }
        }
    }

    /// Report everything still queued as cancelled. Runs during
    /// `Stopping`: the in-flight task (if any) already completed because
    /// execution is run-to-completion.
    fn cancel_queued(&mut self, outbox: &SyncSender<Message>) -> Result<()> {
        let queued = self.sched.drain();
        if queued.is_empty() {
            return Ok(());
        }
        tracing::info!(
            worker = self.id,
            count = queued.len(),
            "cancelling queued tasks at shutdown"
        );
        for mut task in queued {
            task.set_state(TaskState::Cancelled);
            METRICS.tasks_cancelled.inc();
            self.emit(
                outbox,
                Message::task_result(SenderId::Worker(self.id), task.summary()),
            )?;
        }
        Ok(())
    }

    fn emit(&self, outbox: &SyncSender<Message>, msg: Message) -> Result<()> {
        outbox.send(msg).map_err(|_| IpcError::Disconnected.into())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
