//! Error types for Pylon

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type for Pylon operations
pub type Result<T> = std::result::Result<T, PylonError>;

/// Errors that can occur in Pylon
#[derive(Debug, Error)]
pub enum PylonError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Listening socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind
        addr: SocketAddr,
        /// Underlying socket error
        source: io::Error,
    },

    /// Request framing failed
    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    /// Request parsing failed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Key-value store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Store log corrupted (CRC mismatch)
    #[error("Store log corrupted at line {offset}: expected CRC {expected:#x}, got {actual:#x}")]
    CorruptedData {
        /// Line number where corruption was detected
        offset: u64,
        /// Expected CRC32 value
        expected: u32,
        /// Actual CRC32 value
        actual: u32,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Failure to extract a request frame from a connection
#[derive(Debug, Error)]
pub enum FrameError {
    /// Header block grew past the configured limit without a terminator
    #[error("header block exceeds {limit} bytes")]
    TooLarge {
        /// Configured maximum header size
        limit: usize,
    },

    /// Declared body length exceeds the configured limit
    #[error("declared body of {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge {
        /// Declared `Content-Length`
        size: usize,
        /// Configured maximum body size
        limit: usize,
    },

    /// Peer closed the connection part-way through a frame
    #[error("peer disconnected with {buffered} bytes of an incomplete frame")]
    Incomplete {
        /// Bytes buffered when the peer went away
        buffered: usize,
    },

    /// Read failed
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// Failure to parse a frame into a request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Request line is not exactly `METHOD TARGET VERSION`
    #[error("malformed request line")]
    MalformedRequestLine,

    /// Request target longer than the configured limit
    #[error("request target of {len} bytes exceeds limit of {limit}")]
    TargetTooLong {
        /// Target length
        len: usize,
        /// Configured limit
        limit: usize,
    },

    /// Header line without a colon, empty name or bad `Content-Length`
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// More header lines than allowed
    #[error("more than {limit} headers")]
    TooManyHeaders {
        /// Configured limit
        limit: usize,
    },

    /// Frame holds fewer body bytes than `Content-Length` declares
    #[error("body shorter than declared Content-Length")]
    IncompleteBody,
}

/// Failure to deliver a response
#[derive(Debug, Error)]
pub enum WriteError {
    /// Socket write failed
    #[error("write failed: {0}")]
    Io(#[from] io::Error),

    /// Peer stopped draining the socket
    #[error("write timed out")]
    Timeout,
}

/// Failure inside a request handler
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Backing store failed
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),

    /// Filesystem access failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Failure inside a key-value store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Persistence failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key cannot be stored
    #[error("invalid key: {0:?}")]
    InvalidKey(String),
}

/// Failure to serve a file below a document root
#[derive(Debug, Error)]
pub enum FileError {
    /// No file at that path
    #[error("file not found")]
    NotFound,

    /// Target tries to leave the document root
    #[error("path escapes the document root")]
    Forbidden,

    /// Reading the file failed
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for FileError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(e)
        }
    }
}
