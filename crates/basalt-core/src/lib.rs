//! Core engine for the Basalt task execution kernel.
//!
//! This crate provides:
//! - Task model shared by the supervisor and workers
//! - Cooperative priority scheduler with deadline enforcement
//! - Logical memory pool enforcing owner/bounds/read-only rules
//! - Typed message protocol for supervisor/worker IPC
//! - Worker loop (the per-process execution engine)
//! - Supervisor owning the worker pool and result aggregation

pub mod agent;
pub mod config;
pub mod error;
pub mod ipc;
pub mod memory;
pub mod metrics;
pub mod sched;
pub mod supervisor;
pub mod task;
pub mod worker;

pub use config::Config;
pub use error::{Error, IpcError, MemoryViolation, Result};
pub use ipc::{Message, MessageKind, SenderId};
pub use memory::{MemoryHandle, MemoryPool};
pub use metrics::METRICS;
pub use sched::Scheduler;
pub use supervisor::Supervisor;
pub use task::{Task, TaskMetadata, TaskPayload, TaskSpec, TaskState, TaskSummary};
pub use worker::{WorkerLoop, WorkerState};
