//! RoboSwarm - Coordination server for a swarm of mobile robots
//!
//! Robots locate the server over UDP discovery, hold one TCP connection each,
//! and report their positions. The server runs Particle Swarm Optimization over
//! those reports and sends every robot its next target.
//!
//! # Architecture
//!
//! - **swarm**: Shared swarm state (registry, records, PSO math, objectives)
//! - **protocol**: Wire frames and discovery tokens
//! - **discovery**: UDP discovery responder
//! - **session**: Per-agent connection handling
//! - **coordinator**: PSO iteration loop and its state machine
//! - **console**: Operator commands
//! - **server**: Wiring, signals and graceful shutdown
//! - **config**: YAML configuration and validation

// Core modules
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod swarm;

// Components
pub mod console;
pub mod coordinator;
pub mod discovery;
pub mod server;
pub mod session;

// Re-exports
pub use error::{Result, SwarmError};
