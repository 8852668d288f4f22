//! Request framing over a byte stream
//!
//! A frame is one request's header block (terminator included) followed by
//! exactly `Content-Length` body bytes. Reads may return any number of bytes;
//! framing never assumes that one read yields one request, and bytes past the
//! end of a frame stay buffered for the next call.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::LimitsConfig;
use crate::error::FrameError;

/// End-of-headers marker
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

static_assertions::const_assert!(
    crate::config::MIN_READ_BUFFER_SIZE > HEADER_TERMINATOR.len()
);

/// Size limits applied while framing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Bytes requested per read
    pub read_buffer_size: usize,
    /// Largest header block accepted, terminator included
    pub max_header_size: usize,
    /// Largest declared body accepted
    pub max_body_size: usize,
}

impl From<&LimitsConfig> for FrameLimits {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            read_buffer_size: limits.read_buffer_size,
            max_header_size: limits.max_header_size,
            max_body_size: limits.max_body_size,
        }
    }
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

/// Extracts frames from one connection's byte stream
pub struct Framer {
    buf: BytesMut,
    chunk: Vec<u8>,
    limits: FrameLimits,
    /// Bytes of `buf` already searched for the terminator
    scanned: usize,
    /// Header block length once the terminator has been found
    header_end: Option<usize>,
    body_len: usize,
}

impl Framer {
    /// Create a framer
    ///
    /// # Panics
    ///
    /// Panics if `read_buffer_size` is 0
    #[must_use]
    pub fn new(limits: FrameLimits) -> Self {
        assert!(limits.read_buffer_size > 0, "read_buffer_size must be > 0");

        Self {
            buf: BytesMut::with_capacity(limits.read_buffer_size),
            chunk: vec![0; limits.read_buffer_size],
            limits,
            scanned: 0,
            header_end: None,
            body_len: 0,
        }
    }

    /// Read until the next complete frame is available
    ///
    /// Returns `Ok(None)` when the peer closes between frames.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::TooLarge` when the header block outgrows the
    /// limit, `FrameError::Incomplete` when the peer closes mid-frame, and
    /// `FrameError::Io` when the read itself fails.
    pub async fn next_frame<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(frame) = self.try_frame()? {
                return Ok(Some(frame));
            }

            if self.fill(reader).await? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(FrameError::Incomplete {
                        buffered: self.buf.len(),
                    })
                };
            }
        }
    }

    /// Perform one read into the buffer, returning the bytes added.
    ///
    /// Cancel-safe: if the future is dropped before completing, no bytes are
    /// lost.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Io` when the read fails
    pub async fn fill<R>(&mut self, reader: &mut R) -> Result<usize, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            match reader.read(&mut self.chunk).await {
                Ok(n) => {
                    self.buf.extend_from_slice(&self.chunk[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(FrameError::Io(e)),
            }
        }
    }

    /// Whether no bytes of a next frame have arrived yet
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.buf.is_empty()
    }

    /// Number of buffered, not yet framed bytes
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn try_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        let header_end = if let Some(end) = self.header_end {
            end
        } else {
            // back up so a terminator split across reads is still found
            let start = self.scanned.saturating_sub(HEADER_TERMINATOR.len() - 1);

            let Some(pos) = find_terminator(&self.buf[start..]) else {
                self.scanned = self.buf.len();
                if self.buf.len() > self.limits.max_header_size {
                    return Err(FrameError::TooLarge {
                        limit: self.limits.max_header_size,
                    });
                }
                return Ok(None);
            };

            let end = start + pos + HEADER_TERMINATOR.len();
            if end > self.limits.max_header_size {
                return Err(FrameError::TooLarge {
                    limit: self.limits.max_header_size,
                });
            }

            let body_len = declared_content_length(&self.buf[..end]);
            if body_len > self.limits.max_body_size {
                return Err(FrameError::BodyTooLarge {
                    size: body_len,
                    limit: self.limits.max_body_size,
                });
            }

            self.header_end = Some(end);
            self.body_len = body_len;
            end
        };

        let frame_len = header_end + self.body_len;
        if self.buf.len() < frame_len {
            return Ok(None);
        }

        let frame = self.buf.split_to(frame_len).freeze();
        self.scanned = 0;
        self.header_end = None;
        self.body_len = 0;

        Ok(Some(frame))
    }
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

/// Body length announced by the header block.
///
/// A missing or non-numeric `Content-Length` counts as 0 here; the parser is
/// the one that rejects a malformed value.
fn declared_content_length(header_block: &[u8]) -> usize {
    let mut length = 0;

    for line in header_block.split(|&b| b == b'\n').skip(1) {
        let Ok(line) = std::str::from_utf8(line) else {
            continue;
        };
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            length = value.trim().parse().unwrap_or(0);
        }
    }

    length
}
