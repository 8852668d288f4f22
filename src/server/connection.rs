//! Per-connection request loop

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{FrameError, ParseError, WriteError};
use crate::http::{
    parse, response_version, FrameLimits, Framer, Method, ParseLimits, Response, ResponseWriter,
    Router, StatusCode, HTTP_10, HTTP_11,
};

/// Where a connection is in its request cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Just accepted
    Accepted,
    /// Waiting for a complete frame
    Framing,
    /// Parsing a frame
    Parsing,
    /// Running the handler
    Dispatching,
    /// Writing the response
    Responding,
    /// Finished; the socket is closed
    Closed,
}

/// Why a connection ended
#[derive(Debug)]
pub enum CloseReason {
    /// Peer closed between requests
    PeerClosed,
    /// No complete frame arrived within the read timeout
    ReadTimeout,
    /// Framing failed
    Frame(FrameError),
    /// Frame did not parse; a 400 was sent
    Malformed(ParseError),
    /// Protocol version not served; a 505 was sent
    UnsupportedVersion(String),
    /// Response could not be delivered
    Write(WriteError),
    /// Handler asked for the connection to end
    HandlerRequested,
    /// Server is draining
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed"),
            Self::ReadTimeout => write!(f, "read timeout"),
            Self::Frame(e) => write!(f, "framing failed: {e}"),
            Self::Malformed(e) => write!(f, "malformed request: {e}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported version {v}"),
            Self::Write(e) => write!(f, "{e}"),
            Self::HandlerRequested => write!(f, "closed by handler"),
            Self::Shutdown => write!(f, "server shutting down"),
        }
    }
}

/// Outcome of one connection
#[derive(Debug)]
pub struct ConnectionSummary {
    /// Responses written
    pub requests: u64,
    /// Why the connection ended
    pub reason: CloseReason,
}

/// Everything a connection task needs, cloned per connection
#[derive(Clone)]
pub struct ConnectionContext {
    router: Arc<Router>,
    frame_limits: FrameLimits,
    parse_limits: ParseLimits,
    read_timeout: Duration,
    writer: ResponseWriter,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionContext {
    /// Build the context shared by all connections of a server
    #[must_use]
    pub fn new(config: &Config, router: Arc<Router>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            router,
            frame_limits: FrameLimits::from(&config.limits),
            parse_limits: ParseLimits::from(&config.limits),
            read_timeout: config.timeouts.read(),
            writer: ResponseWriter::new(config.timeouts.write()),
            shutdown,
        }
    }
}

fn advance(state: &mut ConnectionState, next: ConnectionState) {
    trace!("{:?} -> {:?}", state, next);
    *state = next;
}

/// Serve requests on one connection until it ends.
///
/// Requests are handled strictly in arrival order. The draining flag is
/// checked between request cycles: a connection waiting for the first byte
/// of its next request closes as soon as draining starts, while a request
/// that has started to arrive is read, answered, and only then closed.
pub async fn serve_connection<S>(mut stream: S, mut ctx: ConnectionContext) -> ConnectionSummary
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framer = Framer::new(ctx.frame_limits);
    let mut state = ConnectionState::Accepted;
    let mut requests = 0;

    let reason = loop {
        if *ctx.shutdown.borrow() {
            break CloseReason::Shutdown;
        }

        advance(&mut state, ConnectionState::Framing);
        if framer.is_idle() {
            // only the wait for a request's first byte may be cut short
            let first = tokio::select! {
                biased;
                _ = ctx.shutdown.changed() => break CloseReason::Shutdown,
                result = tokio::time::timeout(ctx.read_timeout, framer.fill(&mut stream)) => result,
            };
            match first {
                Err(_) => break CloseReason::ReadTimeout,
                Ok(Ok(0)) => break CloseReason::PeerClosed,
                Ok(Ok(_)) => {}
                Ok(Err(e)) => break CloseReason::Frame(e),
            }
        }

        let frame = match tokio::time::timeout(ctx.read_timeout, framer.next_frame(&mut stream)).await {
            Err(_) => break CloseReason::ReadTimeout,
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => break CloseReason::PeerClosed,
            Ok(Err(e)) => break CloseReason::Frame(e),
        };

        advance(&mut state, ConnectionState::Parsing);
        let request = match parse(&frame, &ctx.parse_limits) {
            Ok(request) => request,
            Err(e) => {
                // framing of anything after a malformed request is untrustworthy
                let version = response_version(request_line_version(&frame));
                reject(&mut stream, &ctx.writer, Response::bad_request(), version).await;
                break CloseReason::Malformed(e);
            }
        };

        let version = request.version();
        if version != HTTP_10 && version != HTTP_11 {
            let response = Response::empty(StatusCode::HTTP_VERSION_NOT_SUPPORTED);
            reject(&mut stream, &ctx.writer, response, response_version(Some(version))).await;
            break CloseReason::UnsupportedVersion(version.to_string());
        }

        advance(&mut state, ConnectionState::Dispatching);
        let response = ctx.router.dispatch(&request).await;

        advance(&mut state, ConnectionState::Responding);
        let include_body = request.method() != &Method::Head;
        let written = ctx
            .writer
            .write(
                &mut stream,
                &response,
                response_version(Some(version)),
                include_body,
            )
            .await;

        if let Err(e) = written {
            break CloseReason::Write(e);
        }

        requests += 1;
        debug!(
            "{} {} -> {}",
            request.method(),
            request.target(),
            response.status().as_u16()
        );

        if response.closes_connection() {
            break CloseReason::HandlerRequested;
        }
    };

    advance(&mut state, ConnectionState::Closed);
    ConnectionSummary { requests, reason }
}

/// Send a final response before closing
async fn reject<S>(stream: &mut S, writer: &ResponseWriter, response: Response, version: &str)
where
    S: AsyncWrite + Unpin,
{
    let response = response.close();
    if let Err(e) = writer.write(stream, &response, version, true).await {
        debug!("Failed to send {}: {}", response.status().as_u16(), e);
    }
}

/// Version token of a frame's request line, if it has one
fn request_line_version(frame: &[u8]) -> Option<&str> {
    let line = frame.split(|&b| b == b'\n').next()?;
    std::str::from_utf8(line).ok()?.split_ascii_whitespace().nth(2)
}
