//! Configuration validation
//!
//! Validates a RoboSwarm configuration for correctness:
//! - Ports are set and distinct
//! - Discovery tokens are usable
//! - PSO weights and bounds make sense
//! - Timers and queues are non-zero

use super::swarm_config::SwarmConfig;
use crate::swarm::ObjectiveConfig;

/// Validation error details
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a RoboSwarm configuration, collecting every problem
pub fn validate_config(config: &SwarmConfig) -> ValidationResult {
    let mut errors = Vec::new();
    let network = &config.network;
    let pso = &config.pso;

    if network.bind_host.trim().is_empty() {
        errors.push(ValidationError::new(
            "network.bind_host",
            "Bind host cannot be empty",
        ));
    }
    if network.tcp_port == 0 {
        errors.push(ValidationError::new(
            "network.tcp_port",
            "Port must be greater than 0",
        ));
    }
    if network.udp_port == 0 {
        errors.push(ValidationError::new(
            "network.udp_port",
            "Port must be greater than 0",
        ));
    }
    if network.tcp_port != 0 && network.tcp_port == network.udp_port {
        errors.push(ValidationError::new(
            "network.udp_port",
            format!("Discovery port must differ from TCP port {}", network.tcp_port),
        ));
    }

    if network.discovery_request.is_empty() {
        errors.push(ValidationError::new(
            "network.discovery_request",
            "Discovery request token cannot be empty",
        ));
    }
    if network.discovery_response.is_empty() {
        errors.push(ValidationError::new(
            "network.discovery_response",
            "Discovery response token cannot be empty",
        ));
    }
    if !network.discovery_request.is_empty()
        && network.discovery_request == network.discovery_response
    {
        errors.push(ValidationError::new(
            "network.discovery_response",
            "Discovery response must differ from the request",
        ));
    }
    if network.handshake_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "network.handshake_timeout_secs",
            "Handshake timeout must be greater than 0",
        ));
    }
    if network.command_queue == 0 {
        errors.push(ValidationError::new(
            "network.command_queue",
            "Command queue must hold at least one command",
        ));
    }

    for (field, value) in [
        ("pso.inertia", pso.inertia),
        ("pso.cognitive", pso.cognitive),
        ("pso.social", pso.social),
        ("pso.initial_velocity", pso.initial_velocity),
    ] {
        if !value.is_finite() || value < 0.0 {
            errors.push(ValidationError::new(
                field,
                format!("Must be a finite, non-negative number (got {})", value),
            ));
        }
    }

    if pso.iteration_interval_ms == 0 {
        errors.push(ValidationError::new(
            "pso.iteration_interval_ms",
            "Interval must be greater than 0",
        ));
    }
    if !pso.bounds.is_valid() {
        errors.push(ValidationError::new(
            "pso.bounds",
            format!(
                "Bounds must satisfy min < max on both axes (x: {}..{}, y: {}..{})",
                pso.bounds.min_x, pso.bounds.max_x, pso.bounds.min_y, pso.bounds.max_y
            ),
        ));
    }

    if let ObjectiveConfig::DistanceTo { x, y } = config.objective {
        if !x.is_finite() || !y.is_finite() {
            errors.push(ValidationError::new(
                "objective",
                "Target coordinates must be finite",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate and convert into a crate error
pub fn validate_config_result(config: &SwarmConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        crate::SwarmError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
