//! Registry of open connections with a hard ceiling

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Identifier assigned to a connection on accept
pub type ConnectionId = u64;

/// What the registry knows about an open connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Unique id
    pub id: ConnectionId,
    /// Peer address
    pub peer: SocketAddr,
    /// When the connection was accepted
    pub accepted_at: Instant,
}

/// Set of open connections.
///
/// The lock is held only for the insert or remove itself, never across I/O.
#[derive(Clone)]
pub struct ConnectionRegistry {
    open: Arc<Mutex<HashMap<ConnectionId, ConnectionInfo>>>,
    next_id: Arc<AtomicU64>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a registry
    ///
    /// # Panics
    ///
    /// Panics if `max_connections` is 0
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        assert!(max_connections > 0, "max_connections must be > 0");

        Self {
            open: Arc::new(Mutex::new(HashMap::with_capacity(max_connections))),
            next_id: Arc::new(AtomicU64::new(1)),
            max_connections,
        }
    }

    /// Register a connection unless the ceiling is reached.
    ///
    /// The returned guard deregisters the connection when dropped.
    pub fn try_register(&self, peer: SocketAddr) -> Option<ConnectionGuard> {
        let mut open = self.lock();
        if open.len() >= self.max_connections {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        open.insert(
            id,
            ConnectionInfo {
                id,
                peer,
                accepted_at: Instant::now(),
            },
        );

        Some(ConnectionGuard {
            registry: self.clone(),
            id,
        })
    }

    /// Check if a new connection can be registered
    #[must_use]
    pub fn can_accept(&self) -> bool {
        self.lock().len() < self.max_connections
    }

    /// Get the current number of open connections
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.lock().len()
    }

    /// Get the maximum number of connections
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Copy of the open connections, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut connections: Vec<_> = self.lock().values().cloned().collect();
        connections.sort_by_key(|c| c.id);
        connections
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionInfo>> {
        // the map is always left consistent, so a poisoned lock is still usable
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration of one open connection; deregisters on drop
pub struct ConnectionGuard {
    registry: ConnectionRegistry,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Id of the registered connection
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let removed = self.registry.lock().remove(&self.id);
        debug_assert!(removed.is_some(), "connection {} removed twice", self.id);
    }
}
