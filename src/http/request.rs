//! Request model shared by the parser, router and handlers

use std::collections::BTreeMap;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// `HTTP/1.0` version token
pub const HTTP_10: &str = "HTTP/1.0";

/// `HTTP/1.1` version token
pub const HTTP_11: &str = "HTTP/1.1";

/// Request method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `HEAD`
    Head,
    /// Any other token, kept verbatim for the dispatcher to reject
    Unsupported(String),
}

impl Method {
    /// Match a method token case-sensitively
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "HEAD" => Self::Head,
            other => Self::Unsupported(other.to_string()),
        }
    }

    /// Wire representation
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Head => "HEAD",
            Self::Unsupported(token) => token,
        }
    }

    /// Whether this is one of the methods the server knows
    #[must_use]
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header map with case-insensitive names; inserting a name again replaces
/// the earlier value
#[derive(Debug, Clone, Default)]
pub struct Headers {
    // lowercased name -> (name as first written, value)
    entries: BTreeMap<String, (String, String)>,
}

impl Headers {
    /// Create an empty header map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any value stored under the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        self.entries.insert(key, (name, value.into()));
    }

    /// Look up a header value
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// Whether a header is present
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Remove a header, returning its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries
            .remove(&name.to_ascii_lowercase())
            .map(|(_, value)| value)
    }

    /// Iterate over `(name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Number of distinct headers
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for Headers {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((ka, (_, va)), (kb, (_, vb)))| ka == kb && va == vb)
    }
}

impl Eq for Headers {}

/// A parsed request; immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    target: String,
    version: String,
    headers: Headers,
    body: Option<Bytes>,
}

impl Request {
    /// Create a request with no headers and no body
    #[must_use]
    pub fn new(method: Method, target: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: version.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub(crate) fn from_parts(
        method: Method,
        target: String,
        version: String,
        headers: Headers,
        body: Option<Bytes>,
    ) -> Self {
        Self {
            method,
            target,
            version,
            headers,
            body,
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach a body and the matching `Content-Length` header
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.headers.insert("Content-Length", body.len().to_string());
        self.body = Some(body);
        self
    }

    /// Request method
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Raw request target, query string included
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Target without the query string
    #[must_use]
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    /// Query string, if any
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// Protocol version token
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Request headers
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Request body, present when `Content-Length` was sent
    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Serialize back into wire form
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let body_len = self.body.as_ref().map_or(0, Bytes::len);
        let mut out = BytesMut::with_capacity(64 + self.target.len() + body_len);

        out.put_slice(self.method.as_str().as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.target.as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.version.as_bytes());
        out.put_slice(b"\r\n");

        for (name, value) in self.headers.iter() {
            out.put_slice(name.as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"\r\n");

        if let Some(body) = &self.body {
            out.put_slice(body);
        }

        out.freeze()
    }
}
