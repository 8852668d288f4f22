//! Response model built by handlers and consumed by the writer

use bytes::Bytes;
use http::StatusCode;

use super::Headers;

/// A response; immutable once handed to the writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    close: bool,
}

impl Response {
    /// Create an empty response
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            close: false,
        }
    }

    /// Create a response with a body
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::empty(status).with_body(body)
    }

    /// Create a `text/plain` response
    #[must_use]
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status, body.into()).with_header("Content-Type", "text/plain; charset=utf-8")
    }

    /// 400 with an empty body
    #[must_use]
    pub fn bad_request() -> Self {
        Self::empty(StatusCode::BAD_REQUEST)
    }

    /// 404 with an empty body
    #[must_use]
    pub fn not_found() -> Self {
        Self::empty(StatusCode::NOT_FOUND)
    }

    /// 500 with an empty body
    #[must_use]
    pub fn internal_error() -> Self {
        Self::empty(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Add a header. `Content-Length` is always recomputed by the writer.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replace the body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Ask the server to close the connection after this response
    #[must_use]
    pub fn close(mut self) -> Self {
        self.close = true;
        self
    }

    /// Status code
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Handler-supplied headers
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Response body
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether the connection ends after this response
    #[must_use]
    pub fn closes_connection(&self) -> bool {
        self.close
    }
}
