//! Connection supervision and server lifecycle

mod connection;
mod lifecycle;
mod registry;
mod supervisor;

pub use connection::{serve_connection, CloseReason, ConnectionContext, ConnectionState, ConnectionSummary};
pub use lifecycle::{wait_for_signal, LifecycleState, Server, ServerReport, ShutdownHandle};
pub use registry::{ConnectionGuard, ConnectionId, ConnectionInfo, ConnectionRegistry};
pub use supervisor::{Supervisor, SupervisorStats};
