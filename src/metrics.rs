//! Prometheus metrics for the coordination server
//!
//! Provides observability metrics for watching a swarm run. The operator console
//! prints them with the `metrics` command.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter, CounterVec, Encoder, Gauge,
    IntCounter, TextEncoder,
};

lazy_static! {
    /// Gauge: agents currently registered
    pub static ref AGENTS_CONNECTED: Gauge = register_gauge!(
        "roboswarm_agents_connected",
        "Number of agents currently registered"
    )
    .expect("Failed to create agents_connected metric");

    /// Counter: position reports by outcome
    pub static ref POSITION_REPORTS: CounterVec = register_counter_vec!(
        "roboswarm_position_reports_total",
        "Position reports received by status",
        &["status"]
    )
    .expect("Failed to create position_reports metric");

    /// Counter: commands queued for agents by kind
    pub static ref COMMANDS_SENT: CounterVec = register_counter_vec!(
        "roboswarm_commands_sent_total",
        "Commands queued for agents by kind",
        &["kind"]
    )
    .expect("Failed to create commands_sent metric");

    /// Counter: commands that could not be delivered
    pub static ref SEND_FAILURES: IntCounter = register_int_counter!(
        "roboswarm_send_failures_total",
        "Commands that could not be queued or written"
    )
    .expect("Failed to create send_failures metric");

    /// Counter: completed PSO iterations
    pub static ref ITERATIONS: IntCounter = register_int_counter!(
        "roboswarm_pso_iterations_total",
        "Completed PSO iterations"
    )
    .expect("Failed to create pso_iterations metric");

    /// Gauge: objective value of the global best
    pub static ref GLOBAL_BEST: Gauge = register_gauge!(
        "roboswarm_global_best_value",
        "Objective value of the current global best"
    )
    .expect("Failed to create global_best metric");

    /// Gauge: coordinator state (0 idle, 1 running, 2 paused, 3 stopped)
    pub static ref COORDINATOR_STATE: Gauge = register_gauge!(
        "roboswarm_coordinator_state",
        "Coordinator state (0 idle, 1 running, 2 paused, 3 stopped)"
    )
    .expect("Failed to create coordinator_state metric");
}

/// Set the number of registered agents
pub fn set_agents_connected(count: usize) {
    AGENTS_CONNECTED.set(count as f64);
}

/// Record an accepted position report
pub fn record_report_accepted() {
    POSITION_REPORTS.with_label_values(&["accepted"]).inc();
}

/// Record a malformed position report
pub fn record_report_malformed() {
    POSITION_REPORTS.with_label_values(&["malformed"]).inc();
}

/// Record a command queued for an agent
pub fn record_command(kind: &str) {
    COMMANDS_SENT.with_label_values(&[kind]).inc();
}

/// Record a failed send
pub fn record_send_failure() {
    SEND_FAILURES.inc();
}

/// Record a completed iteration
pub fn record_iteration() {
    ITERATIONS.inc();
}

/// Handle to the global best gauge, for the state that owns the value
pub fn global_best_gauge() -> Gauge {
    GLOBAL_BEST.clone()
}

/// Set the coordinator state code
pub fn set_coordinator_state(code: u8) {
    COORDINATOR_STATE.set(f64::from(code));
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        set_agents_connected(2);
        record_report_accepted();
        record_report_malformed();
        record_command("goto");
        record_send_failure();
        record_iteration();
        global_best_gauge().set(1.5);
        set_coordinator_state(1);

        let output = encode_metrics();
        assert!(output.contains("roboswarm_agents_connected"));
        assert!(output.contains("roboswarm_position_reports_total"));
        assert!(output.contains("roboswarm_pso_iterations_total"));
        assert!(output.contains("roboswarm_global_best"));
    }
}
