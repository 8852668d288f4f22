//! Configuration types for Pylon

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::http::Method;
use crate::{PylonError, Result};

/// Smallest read buffer that still holds a typical header block in one chunk
pub const MIN_READ_BUFFER_SIZE: usize = 4096;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listening socket
    #[serde(default)]
    pub listen: ListenConfig,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Socket and shutdown timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Handler table, in match order
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// Listening socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// IPv4 or IPv6 address to bind
    pub address: IpAddr,
    /// Port to bind (0 picks an ephemeral port)
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
        }
    }
}

impl ListenConfig {
    /// Socket address to bind
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Bytes requested from the socket per read
    pub read_buffer_size: usize,
    /// Maximum size of a header block, terminator included
    pub max_header_size: usize,
    /// Maximum length of the request target
    pub max_target_len: usize,
    /// Maximum header lines per request
    pub max_headers: usize,
    /// Maximum declared body size in bytes
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            read_buffer_size: MIN_READ_BUFFER_SIZE,
            max_header_size: 8 * 1024,
            max_target_len: 255,
            max_headers: 128,
            max_body_size: 1024 * 1024, // 1 MB
        }
    }
}

/// Timeouts, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Longest wait for the next frame on an open connection
    pub read_ms: u64,
    /// Longest wait for a response to drain into the socket
    pub write_ms: u64,
    /// Longest wait for in-flight connections during shutdown
    pub drain_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_ms: 30_000,
            write_ms: 30_000,
            drain_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    /// Read timeout as a `Duration`
    #[must_use]
    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    /// Write timeout as a `Duration`
    #[must_use]
    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }

    /// Drain timeout as a `Duration`
    #[must_use]
    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }
}

/// How a route's path is compared to the request target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Target must equal the path (query string ignored)
    Exact,
    /// Target must start with the path on a segment boundary
    #[default]
    Prefix,
}

/// One entry of the handler table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Request method (`GET`, `POST` or `HEAD`)
    pub method: String,
    /// Path to match against the request target
    pub path: String,
    /// Exact or prefix matching
    #[serde(default, rename = "match")]
    pub matching: MatchKind,
    /// Handler serving the route
    pub handler: HandlerConfig,
}

/// Handler backing a route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HandlerConfig {
    /// Serve files below `root`
    Static {
        /// Document root
        root: PathBuf,
    },
    /// Key-value store, file-backed when `data_file` is set
    Kv {
        /// Append-only log for persistence
        #[serde(default)]
        data_file: Option<PathBuf>,
    },
    /// Return the request body
    Echo,
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PylonError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| PylonError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;

        if limits.max_connections == 0 {
            return Err(PylonError::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }

        if limits.read_buffer_size < MIN_READ_BUFFER_SIZE {
            return Err(PylonError::ConfigError(format!(
                "read_buffer_size must be at least {MIN_READ_BUFFER_SIZE}, got {}",
                limits.read_buffer_size
            )));
        }

        for (name, value) in [
            ("max_header_size", limits.max_header_size),
            ("max_target_len", limits.max_target_len),
            ("max_headers", limits.max_headers),
        ] {
            if value == 0 {
                return Err(PylonError::ConfigError(format!("{name} cannot be 0")));
            }
        }

        for (name, ms) in [
            ("read_ms", self.timeouts.read_ms),
            ("write_ms", self.timeouts.write_ms),
            ("drain_ms", self.timeouts.drain_ms),
        ] {
            if ms == 0 {
                return Err(PylonError::ConfigError(format!("{name} cannot be 0")));
            }
        }

        for (i, route) in self.routes.iter().enumerate() {
            match Method::from_token(&route.method) {
                Method::Unsupported(m) => {
                    return Err(PylonError::ConfigError(format!(
                        "Route {i}: unsupported method {m:?}"
                    )));
                }
                Method::Get | Method::Post | Method::Head => {}
            }

            if !route.path.starts_with('/') {
                return Err(PylonError::ConfigError(format!(
                    "Route {i}: path must start with '/', got {:?}",
                    route.path
                )));
            }

            if let HandlerConfig::Static { root } = &route.handler {
                if !root.is_dir() {
                    return Err(PylonError::ConfigError(format!(
                        "Route {i}: static root is not a directory: {}",
                        root.display()
                    )));
                }
            }
        }

        Ok(())
    }
}
