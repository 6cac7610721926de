//! Agent representation
//!
//! Defines the per-robot optimization state tracked by the registry. Each
//! connected robot is one PSO particle.

use super::geometry::{Position, Velocity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable handle for a connected agent
///
/// Either the name the agent announced in its greeting or its peer address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    /// Create a new agent id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Best (lowest) objective value seen together with the position that produced it
///
/// Position and value are only ever replaced together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Best {
    value: f64,
    position: Option<Position>,
}

impl Default for Best {
    fn default() -> Self {
        Self::unset()
    }
}

impl Best {
    /// No value recorded yet (+infinity)
    pub const fn unset() -> Self {
        Self {
            value: f64::INFINITY,
            position: None,
        }
    }

    /// Objective value (+infinity when unset)
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Position that produced the value
    pub fn position(&self) -> Option<Position> {
        self.position
    }

    /// Whether a value has been recorded
    pub fn is_set(&self) -> bool {
        self.position.is_some()
    }

    /// Compare-and-set: replace only when `value` is strictly lower
    ///
    /// Returns true when the stored pair changed. NaN never improves.
    pub fn offer(&mut self, value: f64, position: Position) -> bool {
        if value < self.value {
            self.value = value;
            self.position = Some(position);
            true
        } else {
            false
        }
    }
}

/// Optimization state of one connected agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Unique identifier, immutable for the connection's lifetime
    pub id: AgentId,

    /// Last reported location, None until the first report
    pub position: Option<Position>,

    /// PSO velocity
    pub velocity: Velocity,

    /// Personal best
    pub personal_best: Best,

    /// Number of accepted position reports
    pub reports: u64,

    /// When the agent completed its handshake
    pub connected_at: DateTime<Utc>,

    /// When the last position report was accepted
    pub last_report_at: Option<DateTime<Utc>>,
}

impl AgentRecord {
    /// Create a record with no position and an unset personal best
    pub fn new(id: AgentId, velocity: Velocity) -> Self {
        Self {
            id,
            position: None,
            velocity,
            personal_best: Best::unset(),
            reports: 0,
            connected_at: Utc::now(),
            last_report_at: None,
        }
    }

    /// Whether the coordinator can move this agent
    pub fn is_steerable(&self) -> bool {
        self.position.is_some() && self.personal_best.is_set()
    }
}
