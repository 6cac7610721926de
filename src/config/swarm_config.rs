//! RoboSwarm configuration file handling
//!
//! Loads and manages the ~/.config/roboswarm/config.yaml file. Every field has
//! a default, so a partial file (or no file at all) yields a working server.

use crate::protocol::{DISCOVERY_REQUEST, DISCOVERY_RESPONSE};
use crate::swarm::{Bounds, ObjectiveConfig, PsoWeights};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default TCP port for agent connections
pub const DEFAULT_TCP_PORT: u16 = 65432;

/// Default UDP port for discovery
pub const DEFAULT_UDP_PORT: u16 = 65431;

/// Network settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Interface to listen on
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Port for agent command/report connections
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    /// Port for discovery broadcasts
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,

    /// Payload agents broadcast to find the server
    #[serde(default = "default_discovery_request")]
    pub discovery_request: String,

    /// Payload the server answers with
    #[serde(default = "default_discovery_response")]
    pub discovery_response: String,

    /// How long a new connection may take to send its greeting
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Commands buffered per agent before sends start failing
    #[serde(default = "default_command_queue")]
    pub command_queue: usize,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_udp_port() -> u16 {
    DEFAULT_UDP_PORT
}

fn default_discovery_request() -> String {
    DISCOVERY_REQUEST.to_string()
}

fn default_discovery_response() -> String {
    DISCOVERY_RESPONSE.to_string()
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_command_queue() -> usize {
    16
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            tcp_port: default_tcp_port(),
            udp_port: default_udp_port(),
            discovery_request: default_discovery_request(),
            discovery_response: default_discovery_response(),
            handshake_timeout_secs: default_handshake_timeout(),
            command_queue: default_command_queue(),
        }
    }
}

impl NetworkConfig {
    /// `host:port` for the TCP listener
    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.tcp_port)
    }

    /// `host:port` for the discovery socket
    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.udp_port)
    }

    /// Handshake timeout as a Duration
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// PSO settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsoConfig {
    /// Inertia weight (w)
    #[serde(default = "default_inertia")]
    pub inertia: f64,

    /// Cognitive weight (c1)
    #[serde(default = "default_acceleration")]
    pub cognitive: f64,

    /// Social weight (c2)
    #[serde(default = "default_acceleration")]
    pub social: f64,

    /// Iteration budget; 0 runs until stopped
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Pause between iterations so robots can move and report back
    #[serde(default = "default_iteration_interval")]
    pub iteration_interval_ms: u64,

    /// Search space
    #[serde(default)]
    pub bounds: Bounds,

    /// Spread of the random initial velocity; 0 starts agents at rest
    #[serde(default = "default_initial_velocity")]
    pub initial_velocity: f64,

    /// Fixed RNG seed for reproducible runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Start iterating as soon as the server is up
    #[serde(default)]
    pub autostart: bool,
}

fn default_inertia() -> f64 {
    0.5
}

fn default_acceleration() -> f64 {
    1.5
}

fn default_max_iterations() -> u32 {
    10
}

fn default_iteration_interval() -> u64 {
    3000
}

fn default_initial_velocity() -> f64 {
    1.0
}

impl Default for PsoConfig {
    fn default() -> Self {
        Self {
            inertia: default_inertia(),
            cognitive: default_acceleration(),
            social: default_acceleration(),
            max_iterations: default_max_iterations(),
            iteration_interval_ms: default_iteration_interval(),
            bounds: Bounds::default(),
            initial_velocity: default_initial_velocity(),
            seed: None,
            autostart: false,
        }
    }
}

impl PsoConfig {
    /// Weights as used by the update rule
    pub fn weights(&self) -> PsoWeights {
        PsoWeights {
            inertia: self.inertia,
            cognitive: self.cognitive,
            social: self.social,
        }
    }

    /// Iteration budget, None when unlimited
    pub fn iteration_budget(&self) -> Option<u32> {
        (self.max_iterations > 0).then_some(self.max_iterations)
    }

    /// Interval between iterations
    pub fn iteration_interval(&self) -> Duration {
        Duration::from_millis(self.iteration_interval_ms)
    }
}

/// RoboSwarm configuration
///
/// Represents the complete config.yaml file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// PSO settings
    #[serde(default)]
    pub pso: PsoConfig,

    /// Function the swarm minimizes
    #[serde(default)]
    pub objective: ObjectiveConfig,

    /// Bound on how long shutdown waits for connections to drain
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_shutdown_timeout() -> u64 {
    2
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SwarmConfig {
    /// Create a configuration with every default
    pub fn new() -> Self {
        Self {
            network: NetworkConfig::default(),
            pso: PsoConfig::default(),
            objective: ObjectiveConfig::default(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }

    /// Load configuration from the default path (~/.config/roboswarm/config.yaml)
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        Self::load(&path)
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::SwarmError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading RoboSwarm configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            tcp_port = config.network.tcp_port,
            udp_port = config.network.udp_port,
            max_iterations = config.pso.max_iterations,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving RoboSwarm configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/roboswarm/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("roboswarm");
        path.push("config.yaml");
        path
    }

    /// Shutdown drain bound as a Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
