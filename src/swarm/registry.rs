//! Connection registry
//!
//! [`SwarmState`] maps agent ids to their live connection and optimization
//! state. Every mutation happens under one exclusive lock, and the lock is never
//! held across network I/O: readers take a point-in-time snapshot and act on it
//! afterwards.

use super::agent::{AgentId, AgentRecord, Best};
use super::geometry::{Position, Velocity};
use super::link::{AgentLink, SendError};
use super::pso;
use crate::metrics;
use crate::protocol::Command;
use crate::{Result, SwarmError};
use parking_lot::RwLock;
use prometheus::Gauge;
use std::collections::HashMap;
use tracing::{debug, info, warn};

struct AgentEntry {
    record: AgentRecord,
    link: AgentLink,
}

#[derive(Default)]
struct SwarmInner {
    agents: HashMap<AgentId, AgentEntry>,
    global_best: Best,
    closing: bool,
}

impl SwarmInner {
    fn entry_mut(&mut self, id: &AgentId) -> Result<&mut AgentEntry> {
        self.agents
            .get_mut(id)
            .ok_or_else(|| SwarmError::AgentNotFound(id.to_string()))
    }
}

/// Point-in-time copy of one agent plus a handle to reach it
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub record: AgentRecord,
    pub link: AgentLink,
}

/// What a position report changed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportOutcome {
    /// Objective value at the reported position
    pub value: f64,

    /// The agent's personal best moved
    pub personal_best_improved: bool,

    /// The swarm's global best moved
    pub global_best_improved: bool,
}

/// Result of sending one command to every agent
#[derive(Debug, Clone, Default)]
pub struct BroadcastSummary {
    pub sent: usize,
    pub failed: Vec<(AgentId, SendError)>,
}

/// Shared swarm state
///
/// One instance per server; inject it (behind an `Arc`) into every component.
pub struct SwarmState {
    inner: RwLock<SwarmInner>,

    /// Spread of the random initial velocity given to new agents
    initial_velocity: f64,

    /// Published global-best value; only set while the lock is held
    best_gauge: Gauge,
}

impl Default for SwarmState {
    fn default() -> Self {
        Self::new()
    }
}

impl SwarmState {
    /// Create an empty swarm; new agents start with zero velocity
    pub fn new() -> Self {
        Self::with_initial_velocity(0.0)
    }

    /// Create an empty swarm whose agents start with a random velocity in
    /// `[-spread, spread]` per axis
    pub fn with_initial_velocity(spread: f64) -> Self {
        Self {
            inner: RwLock::new(SwarmInner::default()),
            initial_velocity: spread,
            best_gauge: metrics::global_best_gauge(),
        }
    }

    #[cfg(test)]
    fn with_best_gauge(gauge: Gauge) -> Self {
        Self {
            best_gauge: gauge,
            ..Self::new()
        }
    }

    /// Register a freshly connected agent
    ///
    /// Fails if the id is taken, the link is already closed, or the swarm has
    /// been shut down.
    pub fn register(&self, id: AgentId, link: AgentLink) -> Result<AgentRecord> {
        let velocity = pso::initial_velocity(&mut rand::rng(), self.initial_velocity);
        let record = AgentRecord::new(id.clone(), velocity);

        let count = {
            let mut inner = self.inner.write();
            if inner.closing {
                return Err(SwarmError::Handshake("server is shutting down".to_string()));
            }
            if inner.agents.contains_key(&id) {
                return Err(SwarmError::DuplicateAgent(id.to_string()));
            }
            if !link.is_open() {
                return Err(SwarmError::Handshake(format!(
                    "connection for '{}' closed before registration",
                    id
                )));
            }
            inner.agents.insert(
                id.clone(),
                AgentEntry {
                    record: record.clone(),
                    link,
                },
            );
            inner.agents.len()
        };

        metrics::set_agents_connected(count);
        info!(agent = %id, agents = count, "Agent registered");
        Ok(record)
    }

    /// Remove an agent and close its link
    ///
    /// Removal and closure happen under the same lock, so no reader can observe
    /// a registered agent with a closed link. Returns the final record.
    pub fn unregister(&self, id: &AgentId) -> Option<AgentRecord> {
        let (removed, count) = {
            let mut inner = self.inner.write();
            let removed = inner.agents.remove(id).map(|entry| {
                entry.link.close();
                entry.record
            });
            (removed, inner.agents.len())
        };

        if removed.is_some() {
            metrics::set_agents_connected(count);
            info!(agent = %id, agents = count, "Agent unregistered");
        }
        removed
    }

    /// Remove an agent only if it is still registered with `link`
    ///
    /// A connection that is winding down uses this so it cannot remove a newer
    /// connection that registered under the same id.
    pub fn unregister_link(&self, id: &AgentId, link: &AgentLink) -> Option<AgentRecord> {
        let (removed, count) = {
            let mut inner = self.inner.write();
            let owned = inner
                .agents
                .get(id)
                .is_some_and(|entry| entry.link.same_link(link));
            let removed = if owned {
                inner.agents.remove(id).map(|entry| {
                    entry.link.close();
                    entry.record
                })
            } else {
                None
            };
            (removed, inner.agents.len())
        };

        if removed.is_some() {
            metrics::set_agents_connected(count);
            info!(agent = %id, agents = count, "Agent unregistered");
        }
        removed
    }

    /// Request shutdown for one agent and remove it
    pub fn disconnect(&self, id: &AgentId) -> bool {
        let (found, count) = {
            let mut inner = self.inner.write();
            let found = match inner.agents.remove(id) {
                Some(entry) => {
                    entry.link.shutdown();
                    true
                }
                None => false,
            };
            (found, inner.agents.len())
        };

        if found {
            metrics::set_agents_connected(count);
            info!(agent = %id, agents = count, "Agent disconnected by server");
        }
        found
    }

    /// Send a shutdown request to every agent and empty the registry
    ///
    /// Later registrations are refused. Returns the number of agents that were
    /// connected.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<AgentId> = {
            let mut inner = self.inner.write();
            inner.closing = true;
            inner
                .agents
                .drain()
                .map(|(id, entry)| {
                    entry.link.shutdown();
                    id
                })
                .collect()
        };

        metrics::set_agents_connected(0);
        for id in &drained {
            debug!(agent = %id, "Shutdown requested");
        }
        info!(agents = drained.len(), "Swarm shut down");
        drained.len()
    }

    /// Copy of one agent's record
    pub fn get(&self, id: &AgentId) -> Option<AgentRecord> {
        self.inner.read().agents.get(id).map(|e| e.record.clone())
    }

    /// Whether an agent is registered
    pub fn contains(&self, id: &AgentId) -> bool {
        self.inner.read().agents.contains_key(id)
    }

    /// Ordered copy of every agent with its link
    pub fn get_snapshot(&self) -> Vec<AgentSnapshot> {
        let mut snapshot: Vec<AgentSnapshot> = {
            let inner = self.inner.read();
            inner
                .agents
                .values()
                .map(|e| AgentSnapshot {
                    record: e.record.clone(),
                    link: e.link.clone(),
                })
                .collect()
        };
        snapshot.sort_by(|a, b| a.record.id.cmp(&b.record.id));
        snapshot
    }

    /// Ordered copy of every agent record
    pub fn records(&self) -> Vec<AgentRecord> {
        self.get_snapshot().into_iter().map(|s| s.record).collect()
    }

    /// Number of connected agents
    pub fn len(&self) -> usize {
        self.inner.read().agents.len()
    }

    /// Whether no agent is connected
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current global best
    pub fn global_best(&self) -> Best {
        self.inner.read().global_best
    }

    /// Overwrite an agent's position
    pub fn update_position(&self, id: &AgentId, position: Position) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(id)?;
        entry.record.position = Some(position);
        Ok(())
    }

    /// Compare-and-set an agent's personal best
    pub fn update_personal_best(&self, id: &AgentId, value: f64, position: Position) -> Result<bool> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(id)?;
        Ok(entry.record.personal_best.offer(value, position))
    }

    /// Compare-and-set the global best
    pub fn update_global_best(&self, value: f64, position: Position) -> bool {
        let mut inner = self.inner.write();
        let improved = inner.global_best.offer(value, position);
        if improved {
            self.best_gauge.set(value);
        }
        improved
    }

    /// Store the velocity the coordinator computed for an agent
    pub fn set_velocity(&self, id: &AgentId, velocity: Velocity) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(id)?;
        entry.record.velocity = velocity;
        Ok(())
    }

    /// Apply a position report: position, personal best and global best in one
    /// critical section
    pub fn record_report(&self, id: &AgentId, position: Position, value: f64) -> Result<ReportOutcome> {
        let outcome = {
            let mut inner = self.inner.write();
            let entry = inner.entry_mut(id)?;
            entry.record.position = Some(position);
            entry.record.reports += 1;
            entry.record.last_report_at = Some(chrono::Utc::now());
            let personal_best_improved = entry.record.personal_best.offer(value, position);
            let global_best_improved =
                personal_best_improved && inner.global_best.offer(value, position);
            if global_best_improved {
                self.best_gauge.set(value);
            }
            ReportOutcome {
                value,
                personal_best_improved,
                global_best_improved,
            }
        };

        if outcome.global_best_improved {
            info!(agent = %id, value, x = position.x, y = position.y, "New global best");
        }
        Ok(outcome)
    }

    /// Queue a command for every agent
    ///
    /// Failures are reported, not acted on; each session purges its own agent.
    pub fn broadcast(&self, command: &Command) -> BroadcastSummary {
        let mut summary = BroadcastSummary::default();
        for agent in self.get_snapshot() {
            match agent.link.send(command.clone()) {
                Ok(()) => {
                    metrics::record_command(command.kind());
                    summary.sent += 1;
                }
                Err(e) => {
                    metrics::record_send_failure();
                    warn!(agent = %agent.record.id, error = %e, "Failed to queue command");
                    summary.failed.push((agent.record.id, e));
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn connect(state: &SwarmState, id: &str) -> mpsc::Receiver<Command> {
        let (link, rx) = AgentLink::channel(8);
        state.register(AgentId::new(id), link).unwrap();
        rx
    }

    #[test]
    fn test_register_and_unregister() {
        let state = SwarmState::new();
        let (link, _rx) = AgentLink::channel(8);
        let record = state.register(AgentId::new("ev3-a"), link.clone()).unwrap();

        assert_eq!(record.position, None);
        assert_eq!(record.velocity, Velocity::ZERO);
        assert_eq!(state.len(), 1);

        let removed = state.unregister(&AgentId::new("ev3-a")).unwrap();
        assert_eq!(removed.id.as_str(), "ev3-a");
        assert!(state.is_empty());
        assert!(!link.is_open());
        assert!(state.unregister(&AgentId::new("ev3-a")).is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let state = SwarmState::new();
        let _rx = connect(&state, "ev3-a");

        let (link, _rx2) = AgentLink::channel(8);
        let err = state.register(AgentId::new("ev3-a"), link).unwrap_err();
        assert!(matches!(err, SwarmError::DuplicateAgent(_)));
    }

    #[test]
    fn test_closed_link_rejected() {
        let state = SwarmState::new();
        let (link, _rx) = AgentLink::channel(8);
        link.close();
        assert!(state.register(AgentId::new("ev3-a"), link).is_err());
        assert!(state.is_empty());
    }

    #[test]
    fn test_random_initial_velocity() {
        let state = SwarmState::with_initial_velocity(1.0);
        let (link, _rx) = AgentLink::channel(8);
        let record = state.register(AgentId::new("ev3-a"), link).unwrap();
        assert!(record.velocity.x.abs() <= 1.0);
        assert!(record.velocity.y.abs() <= 1.0);
    }

    #[test]
    fn test_updates_on_unknown_agent() {
        let state = SwarmState::new();
        let ghost = AgentId::new("ghost");
        assert!(state.update_position(&ghost, Position::new(1.0, 1.0)).is_err());
        assert!(state.update_personal_best(&ghost, 1.0, Position::default()).is_err());
        assert!(state.set_velocity(&ghost, Velocity::ZERO).is_err());
        assert!(state.record_report(&ghost, Position::default(), 0.0).is_err());
    }

    #[test]
    fn test_compare_and_set_semantics() {
        let state = SwarmState::new();
        let _rx = connect(&state, "ev3-a");
        let id = AgentId::new("ev3-a");

        assert!(state.update_personal_best(&id, 4.0, Position::new(1.0, 1.0)).unwrap());
        assert!(!state.update_personal_best(&id, 9.0, Position::new(2.0, 2.0)).unwrap());
        let best = state.get(&id).unwrap().personal_best;
        assert_eq!(best.value(), 4.0);
        assert_eq!(best.position(), Some(Position::new(1.0, 1.0)));

        assert!(state.update_global_best(4.0, Position::new(1.0, 1.0)));
        assert!(!state.update_global_best(4.0, Position::new(7.0, 7.0)));
        assert!(state.update_global_best(2.0, Position::new(3.0, 3.0)));
        let global = state.global_best();
        assert_eq!(global.value(), 2.0);
        assert_eq!(global.position(), Some(Position::new(3.0, 3.0)));
    }

    #[test]
    fn test_record_report_keeps_global_below_personal() {
        let state = SwarmState::new();
        let _a = connect(&state, "a");
        let _b = connect(&state, "b");
        let a = AgentId::new("a");
        let b = AgentId::new("b");

        let reports = [
            (&a, 5.0),
            (&b, 3.0),
            (&a, 4.0),
            (&b, 6.0),
            (&a, 1.0),
            (&b, 2.0),
        ];
        let mut last_global = f64::INFINITY;
        for (id, value) in reports {
            state
                .record_report(id, Position::new(value, value), value)
                .unwrap();

            let global = state.global_best().value();
            assert!(global <= last_global);
            for record in state.records() {
                assert!(global <= record.personal_best.value());
            }
            last_global = global;
        }
        assert_eq!(last_global, 1.0);
        assert_eq!(state.get(&b).unwrap().personal_best.value(), 2.0);
        assert_eq!(state.get(&a).unwrap().reports, 3);
    }

    #[test]
    fn test_snapshot_is_ordered_copy() {
        let state = SwarmState::new();
        let _c = connect(&state, "c");
        let _a = connect(&state, "a");
        let _b = connect(&state, "b");

        let snapshot = state.get_snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|s| s.record.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        state
            .update_position(&AgentId::new("a"), Position::new(9.0, 9.0))
            .unwrap();
        assert_eq!(snapshot[0].record.position, None);
    }

    #[test]
    fn test_disconnect_requests_shutdown() {
        let state = SwarmState::new();
        let (link, _rx) = AgentLink::channel(8);
        state.register(AgentId::new("ev3-a"), link.clone()).unwrap();

        assert!(state.disconnect(&AgentId::new("ev3-a")));
        assert!(state.is_empty());
        assert!(link.shutdown_requested());
        assert!(!link.is_open());
        assert!(!state.disconnect(&AgentId::new("ev3-a")));
    }

    #[test]
    fn test_shutdown_reaches_everyone() {
        let state = SwarmState::new();
        let (a, _rx_a) = AgentLink::channel(1);
        let (b, _rx_b) = AgentLink::channel(1);
        state.register(AgentId::new("a"), a.clone()).unwrap();
        state.register(AgentId::new("b"), b.clone()).unwrap();
        // A full queue must not keep the request from going out
        b.send(Command::Text("busy".to_string())).unwrap();

        assert_eq!(state.shutdown(), 2);
        assert!(state.is_empty());
        assert!(a.shutdown_requested());
        assert!(b.shutdown_requested());

        let (link, _rx) = AgentLink::channel(8);
        assert!(state.register(AgentId::new("late"), link).is_err());
    }

    #[test]
    fn test_unregister_link_spares_newer_connection() {
        let state = SwarmState::new();
        let id = AgentId::new("ev3-a");
        let (old, _old_rx) = AgentLink::channel(8);
        state.register(id.clone(), old.clone()).unwrap();
        state.disconnect(&id);

        let (new, _new_rx) = AgentLink::channel(8);
        state.register(id.clone(), new.clone()).unwrap();

        assert!(state.unregister_link(&id, &old).is_none());
        assert!(state.contains(&id));
        assert!(new.is_open());

        assert!(state.unregister_link(&id, &new).is_some());
        assert!(state.is_empty());
        assert!(!new.is_open());
    }

    #[test]
    fn test_best_gauge_tracks_concurrent_improvements() {
        let gauge = Gauge::new("test_global_best", "global best under test").unwrap();
        let state = Arc::new(SwarmState::with_best_gauge(gauge.clone()));

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for step in (0..500).rev() {
                        let value = (step * 4 + worker) as f64;
                        state.update_global_best(value, Position::new(value, 0.0));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(state.global_best().value(), 0.0);
        assert_eq!(gauge.get(), state.global_best().value());
    }

    #[test]
    fn test_broadcast_reports_failures() {
        let state = SwarmState::new();
        let mut a = connect(&state, "a");
        let b = connect(&state, "b");
        drop(b);

        let summary = state.broadcast(&Command::Text("beep".to_string()));
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0.as_str(), "b");
        assert_eq!(a.try_recv().unwrap(), Command::Text("beep".to_string()));
    }

    #[test]
    fn test_concurrent_registry_never_exposes_closed_links() {
        let state = Arc::new(SwarmState::new());
        let mut workers = Vec::new();

        for worker in 0..4 {
            let state = Arc::clone(&state);
            workers.push(std::thread::spawn(move || {
                for round in 0..200 {
                    let id = AgentId::new(format!("agent-{}-{}", worker, round));
                    let (link, _rx) = AgentLink::channel(4);
                    if state.register(id.clone(), link).is_ok() {
                        let p = Position::new(round as f64, worker as f64);
                        state.record_report(&id, p, round as f64).unwrap();
                        state.unregister(&id);
                    }
                }
            }));
        }

        let reader = {
            let state = Arc::clone(&state);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let snapshot = state.get_snapshot();
                    let global = state.global_best().value();
                    for agent in snapshot {
                        assert!(agent.link.is_open() || !state.contains(&agent.record.id));
                        assert!(global <= agent.record.personal_best.value());
                    }
                }
            })
        };

        for worker in workers {
            worker.join().unwrap();
        }
        reader.join().unwrap();
        assert!(state.is_empty());
    }
}
