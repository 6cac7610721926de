//! Error types for RoboSwarm
//!
//! Defines the error enum covering every failure mode of the coordination server.
//! Uses thiserror for ergonomic error handling.

use crate::protocol::ProtocolError;
use thiserror::Error;

/// Result type alias for RoboSwarm operations
pub type Result<T> = std::result::Result<T, SwarmError>;

/// Error type for RoboSwarm operations
#[derive(Error, Debug)]
pub enum SwarmError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Listener could not be bound (fatal at startup)
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// An agent with the same id is already connected
    #[error("Agent '{0}' is already registered")]
    DuplicateAgent(String),

    /// Agent is not in the registry
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Coordinator state machine rejected a command
    #[error("Cannot {action} while coordinator is {from}")]
    InvalidTransition { from: String, action: String },

    /// Wire protocol violations
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Agent failed to identify itself
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Coordinator task is gone
    #[error("Coordinator is not running")]
    CoordinatorUnavailable,

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl SwarmError {
    /// Whether the error should abort the process
    ///
    /// Only startup bind failures are fatal; everything else is recovered locally.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SwarmError::Bind { .. })
    }
}
