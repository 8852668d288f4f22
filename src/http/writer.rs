//! Response serialization and delivery

use std::io;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{Response, HTTP_10, HTTP_11};
use crate::error::WriteError;

/// Status-line version to answer a request of the given version with
#[must_use]
pub fn response_version(request_version: Option<&str>) -> &'static str {
    match request_version {
        Some(HTTP_10) => HTTP_10,
        _ => HTTP_11,
    }
}

/// Serialize a response.
///
/// `Content-Length` is always derived from the body; a handler-supplied value
/// is discarded. With `include_body` false (HEAD) the body is left off the
/// wire but still counted.
#[must_use]
pub fn encode(response: &Response, version: &str, include_body: bool) -> Bytes {
    let body = response.body();
    let status = response.status();
    let mut out = BytesMut::with_capacity(128 + body.len());

    out.put_slice(version.as_bytes());
    out.put_u8(b' ');
    out.put_slice(status.as_str().as_bytes());
    out.put_u8(b' ');
    out.put_slice(status.canonical_reason().unwrap_or("").as_bytes());
    out.put_slice(b"\r\n");

    out.put_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());

    for (name, value) in response.headers().iter() {
        if name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        out.put_slice(name.as_bytes());
        out.put_slice(b": ");
        out.put_slice(value.as_bytes());
        out.put_slice(b"\r\n");
    }

    if response.closes_connection() && !response.headers().contains("connection") {
        out.put_slice(b"Connection: close\r\n");
    }

    out.put_slice(b"\r\n");

    if include_body {
        out.put_slice(body);
    }

    out.freeze()
}

/// Writes responses to a connection within a time limit
#[derive(Debug, Clone, Copy)]
pub struct ResponseWriter {
    timeout: Duration,
}

impl ResponseWriter {
    /// Create a writer that gives up after `timeout`
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Serialize and send a response, returning the number of bytes sent
    ///
    /// # Errors
    ///
    /// Returns `WriteError::Io` if the socket fails and `WriteError::Timeout`
    /// if the peer does not drain the response in time. Either way the caller
    /// must close the connection.
    pub async fn write<W>(
        &self,
        writer: &mut W,
        response: &Response,
        version: &str,
        include_body: bool,
    ) -> Result<usize, WriteError>
    where
        W: AsyncWrite + Unpin,
    {
        let wire = encode(response, version, include_body);

        tokio::time::timeout(self.timeout, write_all(writer, &wire))
            .await
            .map_err(|_| WriteError::Timeout)??;

        Ok(wire.len())
    }
}

/// Write every byte, accumulating partial writes and retrying interrupts
async fn write_all<W>(writer: &mut W, mut buf: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while !buf.is_empty() {
        match writer.write(buf).await {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole response",
                ));
            }
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    writer.flush().await
}
