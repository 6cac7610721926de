//! Configuration system
//!
//! Loads ~/.config/roboswarm/config.yaml with support for:
//! - Network ports and discovery tokens
//! - PSO weights, bounds and iteration budget
//! - The objective function the swarm minimizes
//! - Shutdown timing

mod swarm_config;
pub mod validation;

pub use swarm_config::{
    NetworkConfig, PsoConfig, SwarmConfig, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT,
};
pub use validation::{validate_config, validate_config_result, ValidationError};
