//! Inter-process messaging: typed protocol, wire framing, and the
//! bounded in-process channel contract built on `std::sync::mpsc`.
//!
//! Ordering guarantee: messages from one sender are delivered in send
//! order (single pipe, single writer thread per worker). No ordering is
//! guaranteed across senders.

mod protocol;

pub use protocol::{
    MAX_FRAME_BYTES, Message, MessageKind, SenderId, read_message, write_message,
};

use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{IpcError, Result};

/// Bound on in-process message queues. A full queue means the peer has
/// stalled; `send` then blocks up to its timeout instead of growing the
/// queue without limit.
pub const CHANNEL_CAPACITY: usize = 256;

/// How long a full queue is re-polled before giving up.
const FULL_QUEUE_BACKOFF: Duration = Duration::from_millis(1);

/// Block until `msg` is accepted by the queue or `timeout` elapses.
///
/// A timeout is surfaced to the caller as [`IpcError::Timeout`], never
/// silently retried.
pub fn send(tx: &SyncSender<Message>, msg: Message, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut msg = msg;
    loop {
        match tx.try_send(msg) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Disconnected(_)) => return Err(IpcError::Disconnected.into()),
            Err(TrySendError::Full(returned)) => {
                if Instant::now() >= deadline {
                    return Err(IpcError::Timeout(timeout).into());
                }
                msg = returned;
                thread::park_timeout(FULL_QUEUE_BACKOFF);
            }
        }
    }
}

/// Block until a message arrives or `timeout` elapses.
pub fn recv(rx: &Receiver<Message>, timeout: Duration) -> Result<Message> {
    rx.recv_timeout(timeout).map_err(|e| match e {
        RecvTimeoutError::Timeout => IpcError::Timeout(timeout).into(),
        RecvTimeoutError::Disconnected => IpcError::Disconnected.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::mpsc;

    #[test]
    fn send_recv_round_trip() {
        let (tx, rx) = mpsc::sync_channel(4);
        send(
            &tx,
            Message::heartbeat(SenderId::Supervisor),
            Duration::from_millis(100),
        )
        .unwrap();
        let msg = recv(&rx, Duration::from_millis(100)).unwrap();
        assert!(matches!(msg.kind, MessageKind::Heartbeat));
    }

    #[test]
    fn send_times_out_on_full_queue() {
        let (tx, _rx) = mpsc::sync_channel(1);
        send(
            &tx,
            Message::heartbeat(SenderId::Supervisor),
            Duration::from_millis(50),
        )
        .unwrap();
        let err = send(
            &tx,
            Message::heartbeat(SenderId::Supervisor),
            Duration::from_millis(50),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Ipc(IpcError::Timeout(_))));
    }

    #[test]
    fn recv_times_out_when_empty() {
        let (_tx, rx) = mpsc::sync_channel::<Message>(1);
        let err = recv(&rx, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::Ipc(IpcError::Timeout(_))));
    }

    #[test]
    fn disconnected_peer_is_reported() {
        let (tx, rx) = mpsc::sync_channel::<Message>(1);
        drop(rx);
        let err = send(
            &tx,
            Message::heartbeat(SenderId::Supervisor),
            Duration::from_millis(10),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Ipc(IpcError::Disconnected)));
    }

    #[test]
    fn per_sender_order_is_preserved() {
        let (tx, rx) = mpsc::sync_channel(8);
        for i in 0..5 {
            send(
                &tx,
                Message::heartbeat(SenderId::Worker(i)),
                Duration::from_millis(100),
            )
            .unwrap();
        }
        for i in 0..5 {
            let msg = recv(&rx, Duration::from_millis(100)).unwrap();
            assert_eq!(msg.sender, SenderId::Worker(i));
        }
    }
}
