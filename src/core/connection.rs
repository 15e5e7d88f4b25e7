//! Live connection state
//! Handles outbound delivery for one authenticated client

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;
use log::warn;

/// Identity of one accepted transport connection
pub type ConnectionId = Uuid;

/// Outbound half of a connection: complete encoded frames queued for its writer task
pub type FrameSender = mpsc::UnboundedSender<String>;

/// Represents the state of a single authenticated connection.
///
/// All deliveries go through `sender`, whose single consumer owns the socket's
/// write half, so frames from concurrent fan-out paths never interleave.
pub struct Connection {
    pub id: ConnectionId,
    pub username: String,
    pub sender: FrameSender,
    pub peer: Option<SocketAddr>,
    pub connected_at: Instant,
}

impl Connection {
    /// Create a new connection with a unique ID
    pub fn new(username: impl Into<String>, sender: FrameSender) -> Self {
        Self::with_id(Uuid::new_v4(), username, sender)
    }

    pub fn with_id(id: ConnectionId, username: impl Into<String>, sender: FrameSender) -> Self {
        Self {
            id,
            username: username.into(),
            sender,
            peer: None,
            connected_at: Instant::now(),
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Queue an encoded frame for this connection
    pub fn send_line(&self, line: &str) -> bool {
        match self.sender.send(line.to_string()) {
            Ok(_) => true,
            Err(_) => {
                warn!("Failed to send frame to {} ({})", self.username, self.id);
                false
            }
        }
    }

    /// Whether the writer side of this connection has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Calculate the connection duration
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_line_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection::new("alice", tx);
        assert!(connection.send_line("SYS|1|2|hi|success\r\n"));

        drop(rx);
        assert!(connection.is_closed());
        assert!(!connection.send_line("ignored\r\n"));
    }
}
