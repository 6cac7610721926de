//! Planar geometry for the search space
//!
//! Robots move on a flat arena, so every quantity is a 2-D vector.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// A point in the search space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Create a new position
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another position
    pub fn distance_to(&self, other: Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Whether both coordinates are finite
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

/// A PSO velocity (displacement per iteration)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f64,
    pub y: f64,
}

impl Velocity {
    /// Zero velocity
    pub const ZERO: Velocity = Velocity { x: 0.0, y: 0.0 };

    /// Create a new velocity
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Component-wise product, used to apply per-axis random coefficients
    pub fn scale(self, factors: (f64, f64)) -> Velocity {
        Velocity::new(self.x * factors.0, self.y * factors.1)
    }
}

impl Sub for Position {
    type Output = Velocity;

    fn sub(self, rhs: Position) -> Velocity {
        Velocity::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Add<Velocity> for Position {
    type Output = Position;

    fn add(self, rhs: Velocity) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Add for Velocity {
    type Output = Velocity;

    fn add(self, rhs: Velocity) -> Velocity {
        Velocity::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Mul<f64> for Velocity {
    type Output = Velocity;

    fn mul(self, rhs: f64) -> Velocity {
        Velocity::new(self.x * rhs, self.y * rhs)
    }
}

/// Axis-aligned rectangle the swarm is allowed to move in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default = "default_min")]
    pub min_x: f64,
    #[serde(default = "default_max")]
    pub max_x: f64,
    #[serde(default = "default_min")]
    pub min_y: f64,
    #[serde(default = "default_max")]
    pub max_y: f64,
}

fn default_min() -> f64 {
    -10.0
}

fn default_max() -> f64 {
    10.0
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min_x: default_min(),
            max_x: default_max(),
            min_y: default_min(),
            max_y: default_max(),
        }
    }
}

impl Bounds {
    /// Create bounds from two corners
    pub fn new(min: Position, max: Position) -> Self {
        Self {
            min_x: min.x,
            max_x: max.x,
            min_y: min.y,
            max_y: max.y,
        }
    }

    /// Clamp each coordinate into the rectangle
    ///
    /// Points already inside are returned unchanged, which makes clamping idempotent.
    pub fn clamp(&self, p: Position) -> Position {
        Position::new(
            p.x.max(self.min_x).min(self.max_x),
            p.y.max(self.min_y).min(self.max_y),
        )
    }

    /// Whether the point lies inside (inclusive)
    pub fn contains(&self, p: Position) -> bool {
        (self.min_x..=self.max_x).contains(&p.x) && (self.min_y..=self.max_y).contains(&p.y)
    }

    /// Whether min < max on both axes
    pub fn is_valid(&self) -> bool {
        self.min_x.is_finite()
            && self.max_x.is_finite()
            && self.min_y.is_finite()
            && self.max_y.is_finite()
            && self.min_x < self.max_x
            && self.min_y < self.max_y
    }
}
