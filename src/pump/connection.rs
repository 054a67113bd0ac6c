//! Per-connection state shared between the pump tasks and the hub

use chrono::Utc;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use tokio::sync::Notify;

use crate::hub::ConnectionId;

/// Lifecycle of a client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Registered = 1,
    /// Hub closed the queue; pending messages are flushed before closing
    Draining = 2,
    /// Reader saw a close or I/O error; pending messages are discarded
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Registered,
            2 => ConnectionState::Draining,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Identity, lifecycle and liveness of one accepted client
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    state: AtomicU8,
    connected_at: i64,
    /// Milliseconds since epoch of the last successful write
    last_write: AtomicI64,
    /// Milliseconds since epoch of the last pong
    last_pong: AtomicI64,
    reader_closing: Notify,
    writer_stopped: Notify,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, peer: Option<SocketAddr>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id,
            peer,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            connected_at: now,
            last_write: AtomicI64::new(now),
            last_pong: AtomicI64::new(now),
            reader_closing: Notify::new(),
            writer_stopped: Notify::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn connected_at(&self) -> i64 {
        self.connected_at
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Connecting -> Registered
    pub fn mark_registered(&self) -> bool {
        self.transition(ConnectionState::Connecting, ConnectionState::Registered)
    }

    /// Registered -> Draining, taken by the hub when it closes the queue
    pub fn begin_draining(&self) -> bool {
        self.transition(ConnectionState::Registered, ConnectionState::Draining)
    }

    /// Registered (or Connecting) -> Closing, taken by the reader.
    ///
    /// Wakes the writer so it stops without flushing.
    pub fn begin_closing(&self) -> bool {
        let moved = self.transition(ConnectionState::Registered, ConnectionState::Closing)
            || self.transition(ConnectionState::Connecting, ConnectionState::Closing);
        if moved {
            self.reader_closing.notify_one();
        }
        moved
    }

    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    pub fn is_closing(&self) -> bool {
        self.state() == ConnectionState::Closing
    }

    /// Resolves once the reader has moved the connection to Closing
    pub(crate) async fn reader_closed(&self) {
        self.reader_closing.notified().await
    }

    pub(crate) fn signal_writer_stopped(&self) {
        self.writer_stopped.notify_one();
    }

    /// Resolves once the writer task has exited
    pub(crate) async fn writer_stopped(&self) {
        self.writer_stopped.notified().await
    }

    pub fn touch_write(&self) {
        self.last_write
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn touch_pong(&self) {
        self.last_pong
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_write_time(&self) -> i64 {
        self.last_write.load(Ordering::Relaxed)
    }

    pub fn last_pong_time(&self) -> i64 {
        self.last_pong.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let conn = ConnectionHandle::new(1, None);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.begin_draining());

        assert!(conn.mark_registered());
        assert!(!conn.mark_registered());
        assert_eq!(conn.state(), ConnectionState::Registered);

        conn.mark_closed();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_first_of_draining_and_closing_wins() {
        let drained = ConnectionHandle::new(1, None);
        drained.mark_registered();
        assert!(drained.begin_draining());
        assert!(!drained.begin_closing());
        assert_eq!(drained.state(), ConnectionState::Draining);

        let closed = ConnectionHandle::new(2, None);
        closed.mark_registered();
        assert!(closed.begin_closing());
        assert!(!closed.begin_draining());
        assert!(closed.is_closing());
    }

    #[test]
    fn test_closing_before_registration() {
        let conn = ConnectionHandle::new(3, None);
        assert!(conn.begin_closing());
        assert!(!conn.mark_registered());
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[tokio::test]
    async fn test_closing_wakes_writer_even_if_signalled_first() {
        let conn = ConnectionHandle::new(4, None);
        conn.mark_registered();
        conn.begin_closing();
        // notify_one keeps the permit for a waiter that arrives later
        tokio::time::timeout(std::time::Duration::from_secs(1), conn.reader_closed())
            .await
            .unwrap();
    }
}
