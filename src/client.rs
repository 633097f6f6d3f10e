//! Server-side per-connection chat state
//!
//! Represents one accepted connection as seen by the chat server actor:
//! identity plus the handles needed to reach its driver task.

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use crate::connection::Outbound;
use crate::types::ConnId;

/// One connected client.
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for this connection
    pub id: ConnId,
    /// Peer address, kept for log lines
    pub peer: String,
    /// Username (None until a HELLO succeeds)
    pub username: Option<String>,
    /// Bounded outbound queue feeding the connection driver's writer
    pub sender: mpsc::Sender<Outbound>,
    /// Wakes the driver to drop the socket without draining the queue
    pub evict: Arc<Notify>,
}

impl Client {
    pub fn new(
        id: ConnId,
        peer: String,
        sender: mpsc::Sender<Outbound>,
        evict: Arc<Notify>,
    ) -> Self {
        Self {
            id,
            peer,
            username: None,
            sender,
            evict,
        }
    }

    /// Display name for broadcast formatting; `"anon"` until set.
    pub fn display_name(&self) -> &str {
        match self.username.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => "anon",
        }
    }

    pub fn set_username(&mut self, username: String) {
        self.username = Some(username);
    }
}
