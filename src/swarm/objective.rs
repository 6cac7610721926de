//! Objective functions the swarm minimizes
//!
//! Implementations must be pure: sessions evaluate them concurrently as
//! reports arrive.

use super::geometry::Position;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Scalar function of a 2-D position; lower is better
pub trait Objective: Send + Sync {
    /// Evaluate the objective at `position`
    fn evaluate(&self, position: Position) -> f64;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Euclidean distance to a fixed target point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceTo {
    pub target: Position,
}

impl DistanceTo {
    pub fn new(target: Position) -> Self {
        Self { target }
    }
}

impl Objective for DistanceTo {
    fn evaluate(&self, position: Position) -> f64 {
        position.distance_to(self.target)
    }

    fn describe(&self) -> String {
        format!("distance to {}", self.target)
    }
}

/// Sum of squares, minimized at the origin
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sphere;

impl Objective for Sphere {
    fn evaluate(&self, position: Position) -> f64 {
        position.x * position.x + position.y * position.y
    }

    fn describe(&self) -> String {
        "sphere".to_string()
    }
}

/// Objective selection as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectiveConfig {
    /// Distance to `(x, y)`
    DistanceTo { x: f64, y: f64 },

    /// Sum of squares
    Sphere,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self::DistanceTo { x: 1.0, y: 3.0 }
    }
}

impl ObjectiveConfig {
    /// Build the configured objective
    pub fn build(&self) -> Arc<dyn Objective> {
        match *self {
            ObjectiveConfig::DistanceTo { x, y } => Arc::new(DistanceTo::new(Position::new(x, y))),
            ObjectiveConfig::Sphere => Arc::new(Sphere),
        }
    }
}
