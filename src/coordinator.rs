//! PSO coordinator
//!
//! Periodically reads the swarm, computes a new velocity and target for every
//! agent that has reported, and queues `GOTO` commands on their links.
//!
//! ```text
//! Idle ──start──▶ Running ──pause──▶ Paused ──resume──▶ Running
//!                    │                  │
//!                    └──stop / budget───┴──stop──▶ Stopped ──start──▶ Running
//! ```
//!
//! The coordinator only reads best values; sessions move them as reports
//! arrive. Operators drive it through a [`CoordinatorHandle`].

use crate::config::PsoConfig;
use crate::metrics;
use crate::protocol::Command;
use crate::swarm::{pso, Best, Bounds, PsoWeights, SwarmState};
use crate::{Result, SwarmError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the operator command channel
const COMMAND_CHANNEL_CAPACITY: usize = 10;

/// Coordinator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorState {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl CoordinatorState {
    /// Apply an operator transition
    pub fn apply(self, transition: Transition) -> Result<CoordinatorState> {
        use CoordinatorState::*;
        match (self, transition) {
            (Idle | Stopped, Transition::Start) => Ok(Running),
            (Running, Transition::Pause) => Ok(Paused),
            (Paused, Transition::Resume) => Ok(Running),
            (Running | Paused, Transition::Stop) => Ok(Stopped),
            (from, action) => Err(SwarmError::InvalidTransition {
                from: from.to_string(),
                action: action.to_string(),
            }),
        }
    }

    /// Numeric code exported as a metric
    pub fn code(self) -> u8 {
        match self {
            CoordinatorState::Idle => 0,
            CoordinatorState::Running => 1,
            CoordinatorState::Paused => 2,
            CoordinatorState::Stopped => 3,
        }
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinatorState::Idle => "idle",
            CoordinatorState::Running => "running",
            CoordinatorState::Paused => "paused",
            CoordinatorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Operator-driven state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Stop,
    Pause,
    Resume,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::Start => "start",
            Transition::Stop => "stop",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the coordinator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorStatus {
    pub state: CoordinatorState,
    pub iteration: u32,
    pub max_iterations: Option<u32>,
    pub agents: usize,
    pub global_best: Best,
}

impl fmt::Display for CoordinatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PSO {}", self.state)?;
        match self.max_iterations {
            Some(max) => write!(f, ", iteration {}/{}", self.iteration, max)?,
            None => write!(f, ", iteration {}", self.iteration)?,
        }
        write!(f, ", {} agent(s)", self.agents)?;
        match self.global_best.position() {
            Some(position) => write!(
                f,
                ", global best {:.4} at {}",
                self.global_best.value(),
                position
            ),
            None => write!(f, ", no global best yet"),
        }
    }
}

/// Why an iteration did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No agent has reported yet
    NoGlobalBest,

    /// No agent has both a position and a personal best
    NoSteerableAgents,
}

/// Result of one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Skipped(SkipReason),
    Completed { commanded: usize, failed: usize },
}

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub weights: PsoWeights,
    pub bounds: Bounds,

    /// Iteration budget, None when unlimited
    pub max_iterations: Option<u32>,

    /// Pause between iterations
    pub interval: Duration,

    /// Fixed RNG seed
    pub seed: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&PsoConfig::default())
    }
}

impl From<&PsoConfig> for CoordinatorConfig {
    fn from(pso: &PsoConfig) -> Self {
        Self {
            weights: pso.weights(),
            bounds: pso.bounds,
            max_iterations: pso.iteration_budget(),
            interval: pso.iteration_interval(),
            seed: pso.seed,
        }
    }
}

impl CoordinatorConfig {
    /// Set the iteration interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the iteration budget
    pub fn with_max_iterations(mut self, max: Option<u32>) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the RNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Commands accepted by the coordinator task
enum CoordinatorCommand {
    Transition(Transition, oneshot::Sender<Result<CoordinatorState>>),
    Status(oneshot::Sender<CoordinatorStatus>),
}

/// Cloneable handle for driving a running coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorCommand>,
}

impl fmt::Debug for CoordinatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorCommand::Transition(t, _) => write!(f, "Transition({})", t),
            CoordinatorCommand::Status(_) => f.write_str("Status"),
        }
    }
}

impl CoordinatorHandle {
    /// Begin (or restart) iterating
    pub async fn start(&self) -> Result<CoordinatorState> {
        self.transition(Transition::Start).await
    }

    /// Stop iterating
    pub async fn stop(&self) -> Result<CoordinatorState> {
        self.transition(Transition::Stop).await
    }

    /// Suspend iterating, keeping the iteration count
    pub async fn pause(&self) -> Result<CoordinatorState> {
        self.transition(Transition::Pause).await
    }

    /// Continue after a pause
    pub async fn resume(&self) -> Result<CoordinatorState> {
        self.transition(Transition::Resume).await
    }

    /// Request a state change
    pub async fn transition(&self, transition: Transition) -> Result<CoordinatorState> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CoordinatorCommand::Transition(transition, reply))
            .await
            .map_err(|_| SwarmError::CoordinatorUnavailable)?;
        rx.await.map_err(|_| SwarmError::CoordinatorUnavailable)?
    }

    /// Current status
    pub async fn status(&self) -> Result<CoordinatorStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CoordinatorCommand::Status(reply))
            .await
            .map_err(|_| SwarmError::CoordinatorUnavailable)?;
        rx.await.map_err(|_| SwarmError::CoordinatorUnavailable)
    }
}

/// PSO coordinator
pub struct Coordinator {
    state: Arc<SwarmState>,
    config: CoordinatorConfig,
    rng: StdRng,
    phase: CoordinatorState,
    iteration: u32,
    command_rx: mpsc::Receiver<CoordinatorCommand>,
}

impl Coordinator {
    /// Create a coordinator and the handle that drives it
    pub fn new(state: Arc<SwarmState>, config: CoordinatorConfig) -> (Self, CoordinatorHandle) {
        let (tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let coordinator = Self {
            state,
            config,
            rng,
            phase: CoordinatorState::Idle,
            iteration: 0,
            command_rx,
        };
        metrics::set_coordinator_state(CoordinatorState::Idle.code());
        (coordinator, CoordinatorHandle { tx })
    }

    /// Current lifecycle state
    pub fn phase(&self) -> CoordinatorState {
        self.phase
    }

    /// Completed iterations since the last start
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Build a status report
    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            state: self.phase,
            iteration: self.iteration,
            max_iterations: self.config.max_iterations,
            agents: self.state.len(),
            global_best: self.state.global_best(),
        }
    }

    /// Apply an operator transition
    pub fn apply(&mut self, transition: Transition) -> Result<CoordinatorState> {
        let next = self.phase.apply(transition)?;
        if transition == Transition::Start {
            self.iteration = 0;
        }
        self.set_phase(next);
        info!(action = %transition, state = %next, "Coordinator state changed");
        Ok(next)
    }

    fn set_phase(&mut self, phase: CoordinatorState) {
        self.phase = phase;
        metrics::set_coordinator_state(phase.code());
    }

    /// Run the coordinator loop until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            max_iterations = ?self.config.max_iterations,
            "Coordinator ready"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick(), if self.phase == CoordinatorState::Running => {
                    self.tick();
                }
                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd, &mut interval);
                }
            }
        }

        info!(
            state = %self.phase,
            iteration = self.iteration,
            "Coordinator stopped"
        );
    }

    fn handle_command(&mut self, cmd: CoordinatorCommand, interval: &mut tokio::time::Interval) {
        match cmd {
            CoordinatorCommand::Transition(transition, reply) => {
                let result = self.apply(transition);
                if let Err(e) = &result {
                    warn!(error = %e, "Rejected coordinator command");
                }
                if result.is_ok() && transition == Transition::Start {
                    interval.reset_immediately();
                }
                let _ = reply.send(result);
            }
            CoordinatorCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    /// One timer tick while running: iterate, then enforce the budget
    fn tick(&mut self) {
        if let IterationOutcome::Completed { .. } = self.iterate() {
            self.iteration += 1;
            metrics::record_iteration();

            if let Some(max) = self.config.max_iterations {
                if self.iteration >= max {
                    info!(iterations = self.iteration, "Iteration budget reached");
                    self.set_phase(CoordinatorState::Stopped);
                }
            }
        }
    }

    /// Compute and queue one round of targets
    ///
    /// Does nothing when no agent has reported yet.
    pub fn iterate(&mut self) -> IterationOutcome {
        let Some(global_best) = self.state.global_best().position() else {
            debug!("No global best yet; skipping iteration");
            return IterationOutcome::Skipped(SkipReason::NoGlobalBest);
        };

        let agents: Vec<_> = self
            .state
            .get_snapshot()
            .into_iter()
            .filter(|a| a.record.is_steerable())
            .collect();
        if agents.is_empty() {
            debug!("No agent with a position; skipping iteration");
            return IterationOutcome::Skipped(SkipReason::NoSteerableAgents);
        }

        let mut commanded = 0;
        let mut failed = 0;
        for agent in agents {
            let id = &agent.record.id;
            let (Some(position), Some(personal_best)) =
                (agent.record.position, agent.record.personal_best.position())
            else {
                continue;
            };

            let r1 = pso::draw_coefficients(&mut self.rng);
            let r2 = pso::draw_coefficients(&mut self.rng);
            let step = pso::step(
                &self.config.weights,
                &self.config.bounds,
                agent.record.velocity,
                position,
                personal_best,
                global_best,
                r1,
                r2,
            );

            if self.state.set_velocity(id, step.velocity).is_err() {
                debug!(agent = %id, "Agent left during iteration");
                continue;
            }

            let command = Command::Goto(step.target);
            match agent.link.send(command) {
                Ok(()) => {
                    metrics::record_command("goto");
                    commanded += 1;
                    debug!(agent = %id, target = %step.target, "Target queued");
                }
                Err(e) => {
                    metrics::record_send_failure();
                    failed += 1;
                    warn!(agent = %id, error = %e, "Failed to queue target");
                }
            }
        }

        info!(
            iteration = self.iteration + 1,
            commanded,
            failed,
            "PSO iteration complete"
        );
        IterationOutcome::Completed { commanded, failed }
    }
}
