//! Agent session handler
//!
//! One task per accepted connection. A session reads the agent's greeting,
//! registers it, then turns every position report into swarm-state updates
//! until the agent leaves, the connection drops, or the server shuts down.
//!
//! ```text
//! Handshake ──register──▶ Listening ──EOF / error / desligar / closed link──▶ Terminal
//! ```
//!
//! The terminal step always runs: the agent is unregistered (closing its link)
//! and both halves of the connection are released, whichever path led there.
//! Outbound commands are written by a companion writer task fed through the
//! agent's [`AgentLink`].
//!
//! Removal on the way out is keyed on the link as well as the id, so a
//! session that is still winding down never removes a newer connection that
//! took over its id.

use crate::config::NetworkConfig;
use crate::metrics;
use crate::protocol::{Command, FrameReader, Inbound, DEFAULT_IDLE_FLUSH};
use crate::swarm::{AgentId, AgentLink, Objective, Position, SwarmState};
use crate::SwarmError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on waiting for the greeting
    pub handshake_timeout: Duration,

    /// Commands buffered for the writer
    pub command_queue: usize,

    /// Delay before an unterminated fragment is taken as a whole frame
    pub idle_flush: Duration,

    /// Bound on waiting for the writer to flush after the session ends
    pub drain_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_network(&NetworkConfig::default(), Duration::from_secs(2))
    }
}

impl SessionConfig {
    /// Derive session settings from the network config
    pub fn from_network(network: &NetworkConfig, drain_timeout: Duration) -> Self {
        Self {
            handshake_timeout: network.handshake_timeout(),
            command_queue: network.command_queue,
            idle_flush: DEFAULT_IDLE_FLUSH,
            drain_timeout,
        }
    }
}

/// Shared dependencies of every session
pub struct SessionContext {
    pub state: Arc<SwarmState>,
    pub objective: Arc<dyn Objective>,
    pub config: SessionConfig,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Connection closed before a greeting arrived
    ClosedBeforeHandshake,

    /// No greeting within the handshake timeout
    HandshakeTimeout,

    /// Greeting rejected (duplicate id, oversized frame, agent left at once)
    Rejected(String),

    /// Agent closed the connection
    Eof,

    /// Agent asked to leave
    AgentShutdown,

    /// Server closed the agent's link (kick or failed write)
    Disconnected,

    /// Server is shutting down
    ServerShutdown,

    /// Read failure
    ReadError(String),
}

/// Removes the agent from the registry when dropped, if it is still ours
struct Registration {
    state: Arc<SwarmState>,
    id: AgentId,
    link: AgentLink,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.state.unregister_link(&self.id, &self.link);
    }
}

/// Outcome of the greeting
enum Greeting {
    Accepted {
        id: AgentId,
        first_report: Option<Position>,
    },
    Ended(SessionEnd),
}

/// Session for one agent connection
pub struct AgentSession<S> {
    stream: S,
    peer: SocketAddr,
    ctx: Arc<SessionContext>,
}

impl<S> AgentSession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S, peer: SocketAddr, ctx: Arc<SessionContext>) -> Self {
        Self { stream, peer, ctx }
    }

    /// Run the session to completion
    pub async fn run(self, cancel: CancellationToken) -> SessionEnd {
        let Self { stream, peer, ctx } = self;
        let (read_half, write_half) = tokio::io::split(stream);
        let mut frames = FrameReader::with_idle_flush(read_half, ctx.config.idle_flush);

        let (id, first_report) = match handshake(&mut frames, peer, &ctx, &cancel).await {
            Greeting::Accepted { id, first_report } => (id, first_report),
            Greeting::Ended(end) => {
                debug!(addr = %peer, ?end, "Session ended during handshake");
                return end;
            }
        };

        let (link, commands) = AgentLink::channel(ctx.config.command_queue);
        if let Err(e) = ctx.state.register(id.clone(), link.clone()) {
            warn!(agent = %id, addr = %peer, error = %e, "Rejecting connection");
            return SessionEnd::Rejected(e.to_string());
        }
        let registration = Registration {
            state: Arc::clone(&ctx.state),
            id: id.clone(),
            link: link.clone(),
        };
        info!(agent = %id, addr = %peer, "Agent connected");

        let writer = tokio::spawn(write_commands(
            write_half,
            commands,
            link.clone(),
            Arc::clone(&ctx.state),
            id.clone(),
        ));

        if let Some(position) = first_report {
            apply_report(&ctx, &id, position);
        }

        let end = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break SessionEnd::ServerShutdown,
                _ = link.closed() => break SessionEnd::Disconnected,
                frame = frames.next_frame() => match frame {
                    Ok(None) => break SessionEnd::Eof,
                    Err(e) => {
                        warn!(agent = %id, error = %e, "Read failed");
                        break SessionEnd::ReadError(e.to_string());
                    }
                    Ok(Some(Err(e))) => {
                        warn!(agent = %id, error = %e, "Discarding frame");
                    }
                    Ok(Some(Ok(text))) => match Inbound::parse(&text) {
                        Ok(Inbound::Position(position)) => apply_report(&ctx, &id, position),
                        Ok(Inbound::Shutdown) => break SessionEnd::AgentShutdown,
                        Ok(Inbound::Identify(_)) | Ok(Inbound::Text(_)) => {
                            debug!(agent = %id, frame = %text, "Ignoring message");
                        }
                        Err(e) => {
                            metrics::record_report_malformed();
                            warn!(agent = %id, frame = %text, error = %e, "Malformed message");
                        }
                    },
                },
            }
        };

        drop(registration);
        drop(link);

        match tokio::time::timeout(ctx.config.drain_timeout, writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(agent = %id, error = %e, "Writer task failed"),
            Err(_) => warn!(agent = %id, "Writer did not finish in time; dropping connection"),
        }

        info!(agent = %id, addr = %peer, ?end, "Agent session ended");
        end
    }
}

async fn handshake<R>(
    frames: &mut FrameReader<R>,
    peer: SocketAddr,
    ctx: &SessionContext,
    cancel: &CancellationToken,
) -> Greeting
where
    R: AsyncRead + Unpin,
{
    let first = tokio::select! {
        _ = cancel.cancelled() => return Greeting::Ended(SessionEnd::ServerShutdown),
        read = tokio::time::timeout(ctx.config.handshake_timeout, frames.next_frame()) => read,
    };

    let text = match first {
        Err(_) => {
            warn!(addr = %peer, "No greeting received in time");
            return Greeting::Ended(SessionEnd::HandshakeTimeout);
        }
        Ok(Err(e)) => {
            warn!(addr = %peer, error = %e, "Read failed before greeting");
            return Greeting::Ended(SessionEnd::ReadError(e.to_string()));
        }
        Ok(Ok(None)) => return Greeting::Ended(SessionEnd::ClosedBeforeHandshake),
        Ok(Ok(Some(Err(e)))) => {
            warn!(addr = %peer, error = %e, "Invalid greeting");
            return Greeting::Ended(SessionEnd::Rejected(SwarmError::from(e).to_string()));
        }
        Ok(Ok(Some(Ok(text)))) => text,
    };

    let peer_id = AgentId::new(peer.to_string());
    match Inbound::parse(&text) {
        Ok(Inbound::Identify(name)) => Greeting::Accepted {
            id: AgentId::new(name),
            first_report: None,
        },
        Ok(Inbound::Position(position)) => Greeting::Accepted {
            id: peer_id,
            first_report: Some(position),
        },
        Ok(Inbound::Shutdown) => Greeting::Ended(SessionEnd::Rejected(
            "agent left during handshake".to_string(),
        )),
        Ok(Inbound::Text(greeting)) => {
            debug!(addr = %peer, %greeting, "Greeting received");
            Greeting::Accepted {
                id: peer_id,
                first_report: None,
            }
        }
        Err(e) => {
            metrics::record_report_malformed();
            warn!(addr = %peer, frame = %text, error = %e, "Malformed first message");
            Greeting::Accepted {
                id: peer_id,
                first_report: None,
            }
        }
    }
}

/// Turn a raw position reading into swarm-state updates
fn apply_report(ctx: &SessionContext, id: &AgentId, position: Position) {
    let value = ctx.objective.evaluate(position);
    match ctx.state.record_report(id, position, value) {
        Ok(outcome) => {
            metrics::record_report_accepted();
            debug!(
                agent = %id,
                x = position.x,
                y = position.y,
                value,
                personal_best = outcome.personal_best_improved,
                "Position updated"
            );
        }
        Err(e) => debug!(agent = %id, error = %e, "Report for agent no longer registered"),
    }
}

/// Drain the agent's command queue onto the connection
///
/// Once the link closes, whatever is still queued is written, followed by
/// `desligar` if the server asked the agent to shut down.
async fn write_commands<W>(
    mut writer: WriteHalf<W>,
    mut commands: mpsc::Receiver<Command>,
    link: AgentLink,
    state: Arc<SwarmState>,
    id: AgentId,
) where
    W: AsyncRead + AsyncWrite,
{
    let mut healthy = true;
    let mut said_goodbye = false;

    loop {
        let command = tokio::select! {
            biased;
            command = commands.recv() => command,
            _ = link.closed() => commands.try_recv().ok(),
        };
        let Some(command) = command else { break };

        let frame = command.to_frame();
        if let Err(e) = writer.write_all(frame.as_bytes()).await {
            metrics::record_send_failure();
            warn!(agent = %id, command = command.kind(), error = %e, "Send failed; dropping agent");
            state.unregister_link(&id, &link);
            healthy = false;
            break;
        }
        debug!(agent = %id, frame = %frame.trim_end(), "Command sent");

        if command == Command::Shutdown {
            said_goodbye = true;
            break;
        }
    }

    if healthy && !said_goodbye && link.shutdown_requested() {
        let frame = Command::Shutdown.to_frame();
        match writer.write_all(frame.as_bytes()).await {
            Ok(()) => {
                metrics::record_command(Command::Shutdown.kind());
                debug!(agent = %id, "Shutdown sent");
            }
            Err(e) => {
                metrics::record_send_failure();
                warn!(agent = %id, error = %e, "Could not send shutdown");
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!(agent = %id, error = %e, "Connection already closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::DistanceTo;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, ReadBuf};

    fn context(state: Arc<SwarmState>) -> Arc<SessionContext> {
        Arc::new(SessionContext {
            state,
            objective: Arc::new(DistanceTo::new(Position::new(1.0, 3.0))),
            config: SessionConfig {
                handshake_timeout: Duration::from_millis(300),
                command_queue: 8,
                idle_flush: Duration::from_millis(20),
                drain_timeout: Duration::from_secs(1),
            },
        })
    }

    fn peer() -> SocketAddr {
        "192.168.0.42:40000".parse().unwrap()
    }

    fn spawn_session(
        state: &Arc<SwarmState>,
    ) -> (
        DuplexStream,
        CancellationToken,
        tokio::task::JoinHandle<SessionEnd>,
    ) {
        spawn_session_with_buffer(state, 4096)
    }

    /// A small buffer makes the writer stall until the agent reads
    fn spawn_session_with_buffer(
        state: &Arc<SwarmState>,
        buffer: usize,
    ) -> (
        DuplexStream,
        CancellationToken,
        tokio::task::JoinHandle<SessionEnd>,
    ) {
        let (agent, server) = tokio::io::duplex(buffer);
        let cancel = CancellationToken::new();
        let session = AgentSession::new(server, peer(), context(Arc::clone(state)));
        let handle = tokio::spawn(session.run(cancel.clone()));
        (agent, cancel, handle)
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_handshake_with_name_and_report() {
        let state = Arc::new(SwarmState::new());
        let (mut agent, _cancel, handle) = spawn_session(&state);
        let id = AgentId::new("ev3-alpha");

        agent.write_all(b"ID:ev3-alpha\n").await.unwrap();
        agent.write_all(b"POS:0,0\n").await.unwrap();

        wait_until(|| state.get(&id).is_some_and(|r| r.position.is_some())).await;
        let record = state.get(&id).unwrap();
        assert_eq!(record.position, Some(Position::new(0.0, 0.0)));
        assert!((record.personal_best.value() - 10f64.sqrt()).abs() < 1e-12);

        drop(agent);
        assert_eq!(handle.await.unwrap(), SessionEnd::Eof);
        assert!(!state.contains(&id));
    }

    #[tokio::test]
    async fn test_first_report_registers_by_address() {
        let state = Arc::new(SwarmState::new());
        let (mut agent, _cancel, handle) = spawn_session(&state);
        let id = AgentId::new(peer().to_string());

        agent.write_all(b"pos:3;4").await.unwrap();
        wait_until(|| state.get(&id).is_some_and(|r| r.position.is_some())).await;
        assert_eq!(state.get(&id).unwrap().position, Some(Position::new(3.0, 4.0)));

        agent.write_all(b"desligar\n").await.unwrap();
        assert_eq!(handle.await.unwrap(), SessionEnd::AgentShutdown);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_report_is_ignored() {
        let state = Arc::new(SwarmState::new());
        let (mut agent, _cancel, handle) = spawn_session(&state);
        let id = AgentId::new("ev3-a");

        agent.write_all(b"ID:ev3-a\nPOS:2,2\n").await.unwrap();
        wait_until(|| state.get(&id).is_some_and(|r| r.position.is_some())).await;
        let before = state.get(&id).unwrap();

        agent.write_all(b"POS:abc,def\n").await.unwrap();
        agent.write_all(b"just chatting\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let after = state.get(&id).unwrap();
        assert_eq!(after.position, before.position);
        assert_eq!(after.personal_best, before.personal_best);
        assert!(!handle.is_finished());

        agent.write_all(b"POS:1,3\n").await.unwrap();
        wait_until(|| state.global_best().value() == 0.0).await;

        drop(agent);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_disconnect_sends_shutdown() {
        let state = Arc::new(SwarmState::new());
        let (agent, _cancel, handle) = spawn_session(&state);
        let (read, mut write) = tokio::io::split(agent);
        let id = AgentId::new("ev3-a");

        write.write_all(b"ID:ev3-a\n").await.unwrap();
        wait_until(|| state.contains(&id)).await;

        assert!(state.disconnect(&id));
        assert_eq!(handle.await.unwrap(), SessionEnd::Disconnected);
        assert!(!state.contains(&id));

        let mut lines = BufReader::new(read).lines();
        assert_eq!(lines.next_line().await.unwrap(), Some("desligar".to_string()));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commands_reach_agent() {
        let state = Arc::new(SwarmState::new());
        let (agent, _cancel, handle) = spawn_session(&state);
        let (read, mut write) = tokio::io::split(agent);
        let id = AgentId::new("ev3-a");

        write.write_all(b"ID:ev3-a\n").await.unwrap();
        wait_until(|| state.contains(&id)).await;

        let summary = state.broadcast(&Command::Goto(Position::new(2.0, -1.5)));
        assert_eq!(summary.sent, 1);

        let mut lines = BufReader::new(read).lines();
        assert_eq!(
            lines.next_line().await.unwrap(),
            Some("GOTO:2.000,-1.500".to_string())
        );

        drop(write);
        drop(lines);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let state = Arc::new(SwarmState::new());
        let (mut first, _c1, _h1) = spawn_session(&state);
        first.write_all(b"ID:twin\n").await.unwrap();
        wait_until(|| state.contains(&AgentId::new("twin"))).await;

        let (mut second, _c2, h2) = spawn_session(&state);
        second.write_all(b"ID:twin\n").await.unwrap();
        assert!(matches!(h2.await.unwrap(), SessionEnd::Rejected(_)));
        assert_eq!(state.len(), 1);
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let state = Arc::new(SwarmState::new());
        let (_agent, _cancel, handle) = spawn_session(&state);
        assert_eq!(handle.await.unwrap(), SessionEnd::HandshakeTimeout);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_unregisters() {
        let state = Arc::new(SwarmState::new());
        let (mut agent, cancel, handle) = spawn_session(&state);
        agent.write_all(b"HELLO ev3-z\n").await.unwrap();
        wait_until(|| state.contains(&AgentId::new("ev3-z"))).await;

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), SessionEnd::ServerShutdown);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_survives_full_queue() {
        let state = Arc::new(SwarmState::new());
        let (agent, _cancel, handle) = spawn_session_with_buffer(&state, 8);
        let (read, mut write) = tokio::io::split(agent);
        let id = AgentId::new("ev3-a");

        write.write_all(b"ID:ev3-a\n").await.unwrap();
        wait_until(|| state.contains(&id)).await;

        let goto = Command::Goto(Position::new(1.0, 1.0));
        let mut queued = 0;
        for _ in 0..50 {
            let summary = state.broadcast(&goto);
            queued += summary.sent;
            if !summary.failed.is_empty() {
                break;
            }
        }
        assert!(queued > 0);

        assert!(state.disconnect(&id));

        let mut lines = BufReader::new(read).lines();
        let mut received = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            received.push(line);
        }
        assert_eq!(received.last().map(String::as_str), Some("desligar"));
        assert_eq!(received.len(), queued + 1);
        assert!(received[..queued].iter().all(|line| line.starts_with("GOTO:")));

        assert_eq!(handle.await.unwrap(), SessionEnd::Disconnected);
    }

    #[tokio::test]
    async fn test_stale_session_spares_reconnected_agent() {
        let state = Arc::new(SwarmState::new());
        let (mut agent, _cancel, handle) = spawn_session_with_buffer(&state, 8);
        let id = AgentId::new("ev3-a");

        agent.write_all(b"ID:ev3-a\n").await.unwrap();
        wait_until(|| state.contains(&id)).await;

        // The frame is larger than the pipe, so the writer stalls mid-send
        let summary = state.broadcast(&Command::Goto(Position::new(0.0, 0.0)));
        assert_eq!(summary.sent, 1);
        assert!(state.disconnect(&id));

        let (fresh, _fresh_rx) = AgentLink::channel(8);
        state.register(id.clone(), fresh.clone()).unwrap();

        // The stalled write now fails
        drop(agent);
        assert_eq!(handle.await.unwrap(), SessionEnd::Disconnected);

        assert!(state.contains(&id));
        assert!(fresh.is_open());
    }

    /// Hands out one greeting, then fails every write
    struct BrokenPipeAgent {
        greeting: Option<Vec<u8>>,
    }

    impl AsyncRead for BrokenPipeAgent {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.greeting.take() {
                Some(bytes) => {
                    buf.put_slice(&bytes);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Pending,
            }
        }
    }

    impl AsyncWrite for BrokenPipeAgent {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "agent went away")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_send_failure_drops_agent() {
        let state = Arc::new(SwarmState::new());
        let stream = BrokenPipeAgent {
            greeting: Some(b"ID:ev3-gone\n".to_vec()),
        };
        let session = AgentSession::new(stream, peer(), context(Arc::clone(&state)));
        let handle = tokio::spawn(session.run(CancellationToken::new()));
        let id = AgentId::new("ev3-gone");

        wait_until(|| state.contains(&id)).await;
        let summary = state.broadcast(&Command::Goto(Position::new(2.0, 2.0)));
        assert_eq!(summary.sent, 1);

        assert_eq!(handle.await.unwrap(), SessionEnd::Disconnected);
        assert!(!state.contains(&id));
    }
}
