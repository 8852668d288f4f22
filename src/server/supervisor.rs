//! Accept loop and connection task tracking

use std::io;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info_span, warn, Instrument};

use super::connection::{serve_connection, ConnectionContext, ConnectionSummary};
use super::registry::ConnectionRegistry;

/// Pause after a non-transient accept failure
const ACCEPT_BACKOFF_MS: u64 = 100;

/// Counters kept by the supervisor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    /// Connections registered and handed to a task
    pub accepted: u64,
    /// Connections closed at the ceiling
    pub rejected: u64,
    /// Responses written across all finished connections
    pub requests_served: u64,
    /// Tasks aborted because draining timed out
    pub aborted: u64,
}

/// Owns the listener and one task per open connection
pub struct Supervisor {
    listener: TcpListener,
    registry: ConnectionRegistry,
    context: ConnectionContext,
    tasks: JoinSet<ConnectionSummary>,
    stats: SupervisorStats,
}

impl Supervisor {
    /// Create a supervisor over a bound listener
    #[must_use]
    pub fn new(
        listener: TcpListener,
        registry: ConnectionRegistry,
        context: ConnectionContext,
    ) -> Self {
        Self {
            listener,
            registry,
            context,
            tasks: JoinSet::new(),
            stats: SupervisorStats::default(),
        }
    }

    /// Counters so far
    #[must_use]
    pub fn stats(&self) -> SupervisorStats {
        self.stats
    }

    /// Connection tasks still running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Accept connections until the shutdown flag is raised.
    ///
    /// Finished connection tasks are reaped as they complete so the join set
    /// only ever holds live connections.
    pub async fn accept_until(&mut self, shutdown: &mut watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow_and_update() {
                return;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // every handle is gone, nothing can stop us later
                        debug!("Shutdown channel closed");
                        return;
                    }
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.record(joined);
                }
                result = self.listener.accept() => match result {
                    Ok((stream, peer)) => self.admit(stream, peer),
                    Err(e) if is_transient(&e) => {
                        debug!("Transient accept error: {}", e);
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        tokio::time::sleep(Duration::from_millis(ACCEPT_BACKOFF_MS)).await;
                    }
                },
            }
        }
    }

    /// Wait for open connections to finish, aborting whatever is left after
    /// `timeout`. Returns the number of aborted connections.
    pub async fn drain(&mut self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;

        while !self.tasks.is_empty() {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(joined)) => self.record(joined),
                Ok(None) => break,
                Err(_) => {
                    let remaining = self.tasks.len();
                    warn!(
                        "Drain timed out after {:?}, aborting {} connections",
                        timeout, remaining
                    );
                    self.tasks.abort_all();
                    while self.tasks.join_next().await.is_some() {}
                    self.stats.aborted += remaining as u64;
                    return remaining;
                }
            }
        }

        0
    }

    fn admit(&mut self, stream: tokio::net::TcpStream, peer: std::net::SocketAddr) {
        let Some(guard) = self.registry.try_register(peer) else {
            warn!("Connection limit reached, rejecting {}", peer);
            self.stats.rejected += 1;
            drop(stream);
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        self.stats.accepted += 1;
        let span = info_span!("connection", id = guard.id(), %peer);
        let context = self.context.clone();

        self.tasks.spawn(
            async move {
                debug!("Accepted");
                let summary = serve_connection(stream, context).await;
                debug!(
                    "Closed after {} requests: {}",
                    summary.requests, summary.reason
                );
                drop(guard);
                summary
            }
            .instrument(span),
        );
    }

    fn record(&mut self, joined: Result<ConnectionSummary, JoinError>) {
        match joined {
            Ok(summary) => self.stats.requests_served += summary.requests,
            Err(e) if e.is_panic() => error!("Connection task panicked: {}", e),
            Err(e) => debug!("Connection task cancelled: {}", e),
        }
    }
}

/// Accept errors that say nothing about the health of the listener
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::WouldBlock
    )
}
