//! Coordination server
//!
//! Wires the components together: the TCP listener for agent sessions, the UDP
//! discovery responder, the PSO coordinator and the operator console.
//!
//! Shutdown is triggered by the console `exit` command, SIGINT/SIGTERM, or the
//! token returned by [`SwarmServer::shutdown_token`]. Every agent is then sent
//! `desligar`, and outstanding tasks get a bounded time to finish before they
//! are aborted.

use crate::config::SwarmConfig;
use crate::console::Console;
use crate::coordinator::{Coordinator, CoordinatorConfig, CoordinatorHandle};
use crate::discovery::DiscoveryResponder;
use crate::session::{AgentSession, SessionConfig, SessionContext};
use crate::swarm::SwarmState;
use crate::{Result, SwarmError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Coordination server
pub struct SwarmServer {
    config: SwarmConfig,
    state: Arc<SwarmState>,
    listener: TcpListener,
    discovery: DiscoveryResponder,
    coordinator: Coordinator,
    handle: CoordinatorHandle,
    shutdown: CancellationToken,
    console: bool,
}

impl SwarmServer {
    /// Bind the agent and discovery sockets
    ///
    /// Failing to bind either one is fatal.
    pub async fn bind(config: SwarmConfig) -> Result<Self> {
        let tcp_addr = config.network.tcp_addr();
        let listener = TcpListener::bind(&tcp_addr)
            .await
            .map_err(|source| SwarmError::Bind {
                addr: tcp_addr.clone(),
                source,
            })?;

        let discovery = DiscoveryResponder::bind(
            &config.network.udp_addr(),
            &config.network.discovery_request,
            &config.network.discovery_response,
        )
        .await?;

        let state = Arc::new(SwarmState::with_initial_velocity(
            config.pso.initial_velocity,
        ));
        let (coordinator, handle) =
            Coordinator::new(Arc::clone(&state), CoordinatorConfig::from(&config.pso));

        info!(
            tcp = %listener.local_addr()?,
            udp = %discovery.local_addr()?,
            "Server bound"
        );

        Ok(Self {
            config,
            state,
            listener,
            discovery,
            coordinator,
            handle,
            shutdown: CancellationToken::new(),
            console: false,
        })
    }

    /// Read operator commands from stdin while running
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    /// Address agents connect to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Address discovery requests are answered on
    pub fn discovery_addr(&self) -> Result<SocketAddr> {
        self.discovery.local_addr()
    }

    /// Handle for driving the coordinator
    pub fn coordinator(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// Shared swarm state
    pub fn state(&self) -> Arc<SwarmState> {
        Arc::clone(&self.state)
    }

    /// Token that shuts the server down when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until shut down
    pub async fn run(self) -> Result<()> {
        let Self {
            config,
            state,
            listener,
            discovery,
            coordinator,
            handle,
            shutdown,
            console,
        } = self;

        let mut tasks = JoinSet::new();
        tasks.spawn(discovery.run(shutdown.child_token()));
        tasks.spawn(coordinator.run(shutdown.child_token()));

        if config.pso.autostart {
            match handle.start().await {
                Ok(_) => info!("PSO started automatically"),
                Err(e) => warn!(error = %e, "Autostart failed"),
            }
        }

        if console {
            let console = Console::new(handle.clone(), Arc::clone(&state));
            let token = shutdown.clone();
            tasks.spawn(async move {
                let input = BufReader::new(tokio::io::stdin());
                if let Err(e) = console.run(input, tokio::io::stdout(), token).await {
                    warn!(error = %e, "Console stopped");
                }
            });
        }

        let session_ctx = Arc::new(SessionContext {
            state: Arc::clone(&state),
            objective: config.objective.build(),
            config: SessionConfig::from_network(&config.network, config.shutdown_timeout()),
        });
        let session_cancel = CancellationToken::new();
        let mut sessions = JoinSet::new();

        info!(
            objective = %session_ctx.objective.describe(),
            "Waiting for agents"
        );

        let signal = shutdown_signal();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = &mut signal => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(addr = %peer, error = %e, "Could not disable Nagle");
                        }
                        debug!(addr = %peer, "Connection accepted");
                        let session = AgentSession::new(stream, peer, Arc::clone(&session_ctx));
                        sessions.spawn(session.run(session_cancel.child_token()));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(finished) = sessions.join_next() => {
                    if let Err(e) = finished {
                        error!(error = %e, "Session task failed");
                    }
                }
            }
        }

        info!("Shutting down");
        shutdown.cancel();
        drop(listener);

        let notified = state.shutdown();
        info!(agents = notified, "Shutdown request sent to agents");
        session_cancel.cancel();

        let drain = async {
            while let Some(finished) = sessions.join_next().await {
                if let Err(e) = finished {
                    error!(error = %e, "Session task failed");
                }
            }
            while let Some(finished) = tasks.join_next().await {
                if let Err(e) = finished {
                    error!(error = %e, "Server task failed");
                }
            }
        };

        if tokio::time::timeout(config.shutdown_timeout(), drain)
            .await
            .is_err()
        {
            warn!(
                sessions = sessions.len(),
                tasks = tasks.len(),
                "Tasks did not finish in time; aborting"
            );
            sessions.abort_all();
            tasks.abort_all();
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Resolves on SIGINT or SIGTERM
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to set up signal handlers");
                return std::future::pending().await;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
    }
}

/// Resolves on ctrl-c
#[cfg(not(unix))]
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received ctrl-c, initiating graceful shutdown"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
