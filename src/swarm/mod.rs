//! Swarm state and optimization
//!
//! Holds everything the server knows about the robots it coordinates and the
//! math used to steer them.
//!
//! # Overview
//!
//! Each connected robot is one particle of a Particle Swarm Optimization run:
//!
//! - **Registry**: [`SwarmState`] maps agent ids to their connection and PSO state
//! - **Records**: [`AgentRecord`] holds position, velocity and personal best
//! - **Objective**: [`Objective`] scores a reported position; lower is better
//! - **Update rule**: [`pso`] computes new velocities and clamped targets
//!
//! # Example
//!
//! ```
//! use roboswarm::swarm::{AgentId, AgentLink, Objective, DistanceTo, Position, SwarmState};
//!
//! let state = SwarmState::new();
//! let (link, _commands) = AgentLink::channel(8);
//! state.register(AgentId::new("ev3-a"), link).unwrap();
//!
//! let objective = DistanceTo::new(Position::new(1.0, 3.0));
//! let report = Position::new(0.0, 0.0);
//! state
//!     .record_report(&AgentId::new("ev3-a"), report, objective.evaluate(report))
//!     .unwrap();
//!
//! assert_eq!(state.global_best().position(), Some(report));
//! ```

mod agent;
mod geometry;
mod link;
mod objective;
pub mod pso;
mod registry;

pub use agent::{AgentId, AgentRecord, Best};
pub use geometry::{Bounds, Position, Velocity};
pub use link::{AgentLink, SendError};
pub use objective::{DistanceTo, Objective, ObjectiveConfig, Sphere};
pub use pso::PsoWeights;
pub use registry::{AgentSnapshot, BroadcastSummary, ReportOutcome, SwarmState};
