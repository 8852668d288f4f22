//! Server startup, shutdown and teardown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use super::connection::ConnectionContext;
use super::registry::ConnectionRegistry;
use super::supervisor::{Supervisor, SupervisorStats};
use crate::config::Config;
use crate::http::Router;
use crate::{PylonError, Result};

/// Phase of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Bound, not yet accepting
    Initializing,
    /// Accepting connections
    Listening,
    /// No longer accepting; waiting for open connections
    Draining,
    /// Listener closed and every connection finished
    Stopped,
}

/// What the server did over its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerReport {
    /// Connections accepted
    pub accepted: u64,
    /// Connections rejected at the ceiling
    pub rejected: u64,
    /// Responses written
    pub requests_served: u64,
    /// Connections cut off when draining timed out
    pub aborted: u64,
}

impl From<SupervisorStats> for ServerReport {
    fn from(stats: SupervisorStats) -> Self {
        Self {
            accepted: stats.accepted,
            rejected: stats.rejected,
            requests_served: stats.requests_served,
            aborted: stats.aborted,
        }
    }
}

/// Cloneable handle that starts draining and observes the lifecycle
#[derive(Clone)]
pub struct ShutdownHandle {
    shutdown: Arc<watch::Sender<bool>>,
    state: watch::Receiver<LifecycleState>,
}

impl ShutdownHandle {
    /// Ask the server to drain and stop; idempotent
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Current phase
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Wait until the server reaches [`LifecycleState::Stopped`]
    pub async fn stopped(&mut self) {
        while *self.state.borrow_and_update() != LifecycleState::Stopped {
            if self.state.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A bound HTTP server
pub struct Server {
    supervisor: Supervisor,
    local_addr: SocketAddr,
    drain_timeout: Duration,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    state: watch::Sender<LifecycleState>,
}

impl Server {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns `PylonError::ConfigError` if the configuration is invalid and
    /// `PylonError::Bind` if the address cannot be bound.
    pub async fn bind(config: Config, router: Router) -> Result<Self> {
        config.validate()?;

        let addr = config.listen.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| PylonError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| PylonError::Bind { addr, source })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state, _) = watch::channel(LifecycleState::Initializing);

        let context = ConnectionContext::new(&config, Arc::new(router), shutdown_rx.clone());
        let registry = ConnectionRegistry::new(config.limits.max_connections);

        info!(
            "Bound {} (max {} connections)",
            local_addr, config.limits.max_connections
        );

        Ok(Self {
            supervisor: Supervisor::new(listener, registry, context),
            local_addr,
            drain_timeout: config.timeouts.drain(),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            state,
        })
    }

    /// Address actually bound, useful when port 0 was requested
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for stopping the server from another task
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown: Arc::clone(&self.shutdown_tx),
            state: self.state.subscribe(),
        }
    }

    /// Current phase
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Serve until shut down, then drain.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept and connection failures are
    /// logged and never end the server.
    pub async fn run(mut self) -> Result<ServerReport> {
        self.transition(LifecycleState::Listening);
        info!("Listening on {}", self.local_addr);

        let mut shutdown = self.shutdown_rx.clone();
        self.supervisor.accept_until(&mut shutdown).await;

        // the accept loop may also end because every handle was dropped
        self.shutdown_tx.send_replace(true);
        self.transition(LifecycleState::Draining);
        info!(
            "Draining {} open connections (timeout {:?})",
            self.supervisor.in_flight(),
            self.drain_timeout
        );

        self.supervisor.drain(self.drain_timeout).await;
        let report = ServerReport::from(self.supervisor.stats());

        drop(self.supervisor);
        self.state.send_replace(LifecycleState::Stopped);
        info!(
            "Stopped: {} accepted, {} rejected, {} requests served",
            report.accepted, report.rejected, report.requests_served
        );

        Ok(report)
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        info!("{:?} -> {:?}", previous, next);
    }
}

/// Resolve on the first SIGINT or SIGTERM
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received SIGINT, shutting down");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C, shutting down");
    }

    Ok(())
}
