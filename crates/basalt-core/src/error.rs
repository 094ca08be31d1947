//! Error types for basalt-core.

use std::time::Duration;

use thiserror::Error;

/// Result type for basalt-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in basalt-core.
///
/// Task-level failures (execution errors, memory violations) are recovered
/// inside the worker and recorded on the task as `FAILED`; they never cross
/// the process boundary as errors. Transport and validation errors surface
/// synchronously to the submitting caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed submission, rejected before a task is created.
    #[error("validation error: {0}")]
    Validation(String),

    /// Logical memory violation inside the worker's pool.
    #[error("memory violation: {0}")]
    Memory(#[from] MemoryViolation),

    /// IPC communication error with a worker process.
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    /// Task execution failed inside an agent.
    #[error("execution error: {0}")]
    Execution(String),

    /// Submission named an agent the worker does not know.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// Worker pool lifecycle error.
    #[error("supervisor error: {0}")]
    Supervisor(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Logical memory violations.
///
/// The pool is a simulation: none of these are OS faults, they are the
/// isolation contract enforced in process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryViolation {
    /// Allocation of zero bytes.
    #[error("allocation size must be > 0")]
    ZeroSize,

    /// Pool capacity would be exceeded.
    #[error("out of logical memory: need {needed} bytes, {free} free")]
    CapacityExceeded { needed: usize, free: usize },

    /// Requester does not own the allocation.
    #[error("owner mismatch: allocation owned by {owner:?}, requested by {requester:?}")]
    OwnerMismatch { owner: String, requester: String },

    /// Access outside the allocation's bounds.
    #[error("out-of-bounds access: offset={offset} len={len} size={size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// Write to a read-only allocation.
    #[error("allocation {0} is read-only")]
    ReadOnly(u64),

    /// Operation on a released (or never-issued) handle.
    #[error("use after release: handle {0}")]
    UseAfterRelease(u64),
}

/// Transport-level IPC errors.
#[derive(Debug, Error)]
pub enum IpcError {
    /// A send or receive did not complete within its bound.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The peer end of the channel is gone.
    #[error("channel disconnected")]
    Disconnected,

    /// A frame exceeded the wire size cap.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Message encode/decode failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// The addressed worker is no longer running.
    #[error("worker {0} is not running")]
    WorkerDown(usize),

    /// Underlying pipe failure.
    #[error("pipe error: {0}")]
    Io(#[from] std::io::Error),
}
