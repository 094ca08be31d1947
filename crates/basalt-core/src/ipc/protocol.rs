//! Typed messages between the supervisor and worker processes.
//!
//! Uses length-prefixed bincode frames over stdin/stdout.
//! Format: 4-byte length (u32 LE) + bincode-encoded message.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{IpcError, Result};
use crate::task::{Task, TaskSummary};

/// Wire size cap. Frames above this are rejected rather than allocated.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenderId {
    Supervisor,
    Worker(usize),
}

impl std::fmt::Display for SenderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Supervisor => f.write_str("supervisor"),
            Self::Worker(id) => write!(f, "worker-{id}"),
        }
    }
}

/// Message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageKind {
    /// A task for the receiving worker. Expects exactly one `TaskResult`
    /// with the same task id, eventually.
    TaskSubmit(Box<Task>),
    /// Completion summary for a previously submitted task.
    TaskResult(TaskSummary),
    /// Liveness signal; carries no payload. A worker answers a supervisor
    /// heartbeat with a heartbeat of its own on the result stream.
    Heartbeat,
    /// Drain policy: finish the in-flight task, then exit.
    Shutdown,
}

/// Envelope for all cross-process communication. Immutable once built;
/// ownership transfers to the receiver on delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub sender: SenderId,
    pub kind: MessageKind,
}

impl Message {
    pub fn task_submit(sender: SenderId, task: Task) -> Self {
        Self {
            sender,
            kind: MessageKind::TaskSubmit(Box::new(task)),
        }
    }

    pub fn task_result(sender: SenderId, summary: TaskSummary) -> Self {
        Self {
            sender,
            kind: MessageKind::TaskResult(summary),
        }
    }

    pub fn heartbeat(sender: SenderId) -> Self {
        Self {
            sender,
            kind: MessageKind::Heartbeat,
        }
    }

    pub fn shutdown(sender: SenderId) -> Self {
        Self {
            sender,
            kind: MessageKind::Shutdown,
        }
    }
}

/// Write one length-prefixed frame.
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    let bytes =
        bincode::serialize(message).map_err(|e| IpcError::Codec(format!("encode: {e}")))?;
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(IpcError::FrameTooLarge(bytes.len()).into());
    }
    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(IpcError::from)?;
    writer.write_all(&bytes).map_err(IpcError::from)?;
    writer.flush().map_err(IpcError::from)?;
    Ok(())
}

/// Read one length-prefixed frame.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Message> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).map_err(IpcError::from)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_FRAME_BYTES {
        return Err(IpcError::FrameTooLarge(len).into());
    }

    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).map_err(IpcError::from)?;

    let message =
        bincode::deserialize(&bytes).map_err(|e| IpcError::Codec(format!("decode: {e}")))?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskSpec, TaskState};
    use std::io::Cursor;

    #[test]
    fn task_submit_round_trip() {
        let task = Task::from_spec(
            TaskSpec::new("tenant-a", "echo")
                .with_priority(5)
                .with_input("payload"),
        );
        let id = task.meta.id;

        let mut buf = Vec::new();
        write_message(&mut buf, &Message::task_submit(SenderId::Supervisor, task)).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_message(&mut cursor).unwrap();

        assert_eq!(decoded.sender, SenderId::Supervisor);
        match decoded.kind {
            MessageKind::TaskSubmit(task) => {
                assert_eq!(task.meta.id, id);
                assert_eq!(task.meta.owner, "tenant-a");
                assert_eq!(task.meta.priority, 5);
                assert_eq!(task.payload.agent, "echo");
                assert_eq!(task.payload.input, "payload");
                assert_eq!(task.state(), TaskState::Pending);
            }
            other => panic!("wrong message kind: {other:?}"),
        }
    }

    #[test]
    fn task_result_round_trip() {
        let mut task = Task::from_spec(TaskSpec::new("tenant-a", "noop"));
        task.set_state(TaskState::Running);
        task.fail("simulated failure");

        let mut buf = Vec::new();
        write_message(
            &mut buf,
            &Message::task_result(SenderId::Worker(2), task.summary()),
        )
        .unwrap();

        let decoded = read_message(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded.sender, SenderId::Worker(2));
        match decoded.kind {
            MessageKind::TaskResult(summary) => {
                assert_eq!(summary.state, TaskState::Failed);
                assert_eq!(summary.last_error.as_deref(), Some("simulated failure"));
            }
            other => panic!("wrong message kind: {other:?}"),
        }
    }

    #[test]
    fn control_messages_round_trip() {
        for msg in [
            Message::heartbeat(SenderId::Worker(0)),
            Message::shutdown(SenderId::Supervisor),
        ] {
            let mut buf = Vec::new();
            write_message(&mut buf, &msg).unwrap();
            let decoded = read_message(&mut Cursor::new(buf)).unwrap();
            assert_eq!(decoded.sender, msg.sender);
            assert_eq!(
                std::mem::discriminant(&decoded.kind),
                std::mem::discriminant(&msg.kind)
            );
        }
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Message::heartbeat(SenderId::Supervisor)).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(read_message(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_le_bytes());
        assert!(matches!(
            read_message(&mut Cursor::new(buf)),
            Err(crate::Error::Ipc(IpcError::FrameTooLarge(_)))
        ));
    }

    #[test]
    fn consecutive_frames_preserve_order() {
        let mut buf = Vec::new();
        for i in 0..3 {
            write_message(&mut buf, &Message::heartbeat(SenderId::Worker(i))).unwrap();
        }
        let mut cursor = Cursor::new(buf);
        for i in 0..3 {
            let msg = read_message(&mut cursor).unwrap();
            assert_eq!(msg.sender, SenderId::Worker(i));
        }
    }
}
