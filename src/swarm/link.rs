//! Outbound half of an agent connection
//!
//! An [`AgentLink`] is a cheap, cloneable handle that queues commands for the
//! connection's writer task. Queueing never blocks, so nothing waits on a slow
//! robot while holding the registry lock or driving the swarm.
//!
//! The shutdown request does not go through the queue. [`AgentLink::shutdown`]
//! raises a flag instead, and the writer sends `desligar` once it has drained
//! whatever was queued, so a full queue cannot swallow it.

use crate::protocol::Command;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why a command could not be queued
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("command queue full")]
    QueueFull,
}

/// Handle for sending commands to one connected agent
#[derive(Debug, Clone)]
pub struct AgentLink {
    tx: mpsc::Sender<Command>,
    closed: CancellationToken,
    farewell: CancellationToken,
}

impl AgentLink {
    /// Create a link and the receiving end its writer task drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let link = Self {
            tx,
            closed: CancellationToken::new(),
            farewell: CancellationToken::new(),
        };
        (link, rx)
    }

    /// Queue a command
    pub fn send(&self, command: Command) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Request a final `desligar` and close the link
    ///
    /// The writer flushes the queue, sends the request and stops.
    pub fn shutdown(&self) {
        if !self.closed.is_cancelled() {
            self.farewell.cancel();
        }
        self.close();
    }

    /// Whether the writer owes the agent a shutdown request
    pub fn shutdown_requested(&self) -> bool {
        self.farewell.is_cancelled()
    }

    /// Mark the link closed; the owning session winds the connection down
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether commands are still accepted
    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }

    /// Resolves once the link has been closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Whether both handles feed the same connection
    pub fn same_link(&self, other: &AgentLink) -> bool {
        self.tx.same_channel(&other.tx)
    }
}
