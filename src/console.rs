//! Operator console
//!
//! Line-oriented commands read from stdin (or any buffered reader). The console
//! only posts requests to the coordinator and the registry; it never touches a
//! connection directly, so a slow terminal cannot stall the swarm.

use crate::coordinator::CoordinatorHandle;
use crate::metrics;
use crate::protocol::Command;
use crate::swarm::{AgentId, SwarmState};
use crate::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const HELP: &str = "\
Commands:
  start_pso (start)   begin PSO iterations
  stop_pso (stop)     stop PSO iterations
  pause               suspend iterations
  resume              continue after pause
  status              show coordinator status
  list                show connected agents
  send <text>         send raw text to every agent
  kick <id>           ask one agent to shut down and drop it
  metrics             print server metrics
  help                show this help
  exit (shutdown)     shut the server down
";

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Pause,
    Resume,
    Status,
    List,
    Send(String),
    Kick(String),
    Metrics,
    Help,
    Exit,

    /// Known command missing its argument
    Usage(&'static str),

    Unknown(String),
}

impl ConsoleCommand {
    /// Parse one input line; blank lines yield None
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "start_pso" | "start" => ConsoleCommand::Start,
            "stop_pso" | "stop" => ConsoleCommand::Stop,
            "pause" => ConsoleCommand::Pause,
            "resume" => ConsoleCommand::Resume,
            "status" => ConsoleCommand::Status,
            "list" | "agents" => ConsoleCommand::List,
            "send" if rest.is_empty() => ConsoleCommand::Usage("send <text>"),
            "send" => ConsoleCommand::Send(rest.to_string()),
            "kick" if rest.is_empty() => ConsoleCommand::Usage("kick <id>"),
            "kick" => ConsoleCommand::Kick(rest.to_string()),
            "metrics" => ConsoleCommand::Metrics,
            "help" | "?" => ConsoleCommand::Help,
            "exit" | "shutdown" | "quit" => ConsoleCommand::Exit,
            _ => ConsoleCommand::Unknown(word.to_string()),
        };
        Some(command)
    }
}

/// Operator console bound to one server
pub struct Console {
    coordinator: CoordinatorHandle,
    state: Arc<SwarmState>,
}

impl Console {
    pub fn new(coordinator: CoordinatorHandle, state: Arc<SwarmState>) -> Self {
        Self { coordinator, state }
    }

    /// Read commands until `exit`, end of input, or cancellation
    ///
    /// `exit` cancels `shutdown`, which brings the whole server down. End of
    /// input only stops the console.
    pub async fn run<R, W>(&self, input: R, mut output: W, shutdown: CancellationToken) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        output
            .write_all(b"RoboSwarm console ready. Type 'help' for commands.\n")
            .await?;
        output.flush().await?;

        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                debug!("Console input closed");
                break;
            };
            let Some(command) = ConsoleCommand::parse(&line) else {
                continue;
            };

            let exit = command == ConsoleCommand::Exit;
            let reply = self.execute(command).await;
            output.write_all(reply.as_bytes()).await?;
            output.flush().await?;

            if exit {
                info!("Shutdown requested from console");
                shutdown.cancel();
                break;
            }
        }
        Ok(())
    }

    /// Execute one command and render the reply
    pub async fn execute(&self, command: ConsoleCommand) -> String {
        match command {
            ConsoleCommand::Start => match self.coordinator.start().await {
                Ok(_) => "PSO started\n".to_string(),
                Err(e) => format!("Error: {}\n", e),
            },
            ConsoleCommand::Stop => match self.coordinator.stop().await {
                Ok(_) => "PSO stopped\n".to_string(),
                Err(e) => format!("Error: {}\n", e),
            },
            ConsoleCommand::Pause => match self.coordinator.pause().await {
                Ok(_) => "PSO paused\n".to_string(),
                Err(e) => format!("Error: {}\n", e),
            },
            ConsoleCommand::Resume => match self.coordinator.resume().await {
                Ok(_) => "PSO resumed\n".to_string(),
                Err(e) => format!("Error: {}\n", e),
            },
            ConsoleCommand::Status => match self.coordinator.status().await {
                Ok(status) => format!("{}\n", status),
                Err(e) => format!("Error: {}\n", e),
            },
            ConsoleCommand::List => self.render_agents(),
            ConsoleCommand::Send(text) => {
                let summary = self.state.broadcast(&Command::Text(text));
                format!(
                    "Sent to {} agent(s), {} failed\n",
                    summary.sent,
                    summary.failed.len()
                )
            }
            ConsoleCommand::Kick(id) => {
                if self.state.disconnect(&AgentId::new(id.as_str())) {
                    format!("Disconnected {}\n", id)
                } else {
                    format!("No agent named '{}'\n", id)
                }
            }
            ConsoleCommand::Metrics => metrics::encode_metrics(),
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Exit => "Shutting down...\n".to_string(),
            ConsoleCommand::Usage(usage) => format!("Usage: {}\n", usage),
            ConsoleCommand::Unknown(word) => {
                format!("Unknown command '{}'. Type 'help' for commands.\n", word)
            }
        }
    }

    fn render_agents(&self) -> String {
        let records = self.state.records();
        if records.is_empty() {
            return "No agents connected\n".to_string();
        }

        let mut out = format!("{} agent(s):\n", records.len());
        for record in records {
            let position = record
                .position
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            let best = match record.personal_best.position() {
                Some(p) => format!("{:.4} at {}", record.personal_best.value(), p),
                None => "-".to_string(),
            };
            out.push_str(&format!(
                "  {:<20} pos {:<18} best {:<26} reports {}\n",
                record.id.as_str(),
                position,
                best,
                record.reports
            ));
        }
        out
    }
}
