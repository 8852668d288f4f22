//! Request parsing
//!
//! Turns one frame produced by the [`Framer`](super::Framer) into a
//! [`Request`]. The request line must be exactly three whitespace-separated
//! tokens; header lines must be `name: value`.

use bytes::Bytes;

use super::framer::HEADER_TERMINATOR;
use super::{Headers, Method, Request};
use crate::config::LimitsConfig;
use crate::error::ParseError;

/// Limits enforced while parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    /// Longest request target accepted
    pub max_target_len: usize,
    /// Most header lines accepted
    pub max_headers: usize,
}

impl From<&LimitsConfig> for ParseLimits {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            max_target_len: limits.max_target_len,
            max_headers: limits.max_headers,
        }
    }
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

/// Parse a frame into a request
///
/// # Errors
///
/// Returns `ParseError` when the request line or a header line is malformed,
/// the target is too long, there are too many headers, or the frame carries
/// fewer body bytes than `Content-Length` declares.
pub fn parse(frame: &Bytes, limits: &ParseLimits) -> Result<Request, ParseError> {
    let (head_len, body_start) = frame
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map_or((frame.len(), frame.len()), |pos| {
            (pos, pos + HEADER_TERMINATOR.len())
        });

    let mut lines = frame[..head_len].split(|&b| b == b'\n').map(strip_cr);

    let request_line = lines.next().ok_or(ParseError::MalformedRequestLine)?;
    let (method, target, version) = parse_request_line(request_line, limits)?;

    let mut headers = Headers::new();
    for (count, line) in lines.enumerate() {
        if count >= limits.max_headers {
            return Err(ParseError::TooManyHeaders {
                limit: limits.max_headers,
            });
        }
        let (name, value) = parse_header_line(line)?;
        headers.insert(name, value);
    }

    let body = match headers.get("content-length") {
        None => None,
        Some(raw) => {
            let len: usize = raw
                .parse()
                .map_err(|_| ParseError::MalformedHeader(format!("Content-Length: {raw}")))?;
            let end = body_start
                .checked_add(len)
                .filter(|&end| end <= frame.len())
                .ok_or(ParseError::IncompleteBody)?;
            Some(frame.slice(body_start..end))
        }
    };

    Ok(Request::from_parts(method, target, version, headers, body))
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_request_line(
    line: &[u8],
    limits: &ParseLimits,
) -> Result<(Method, String, String), ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::MalformedRequestLine)?;

    let mut tokens = line.split_ascii_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (tokens.next(), tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(ParseError::MalformedRequestLine);
    };

    if target.len() > limits.max_target_len {
        return Err(ParseError::TargetTooLong {
            len: target.len(),
            limit: limits.max_target_len,
        });
    }

    Ok((
        Method::from_token(method),
        target.to_string(),
        version.to_string(),
    ))
}

fn parse_header_line(line: &[u8]) -> Result<(&str, &str), ParseError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ParseError::MalformedHeader(String::from_utf8_lossy(line).into_owned()))?;

    let Some((name, value)) = text.split_once(':') else {
        return Err(ParseError::MalformedHeader(text.to_string()));
    };

    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(ParseError::MalformedHeader(text.to_string()));
    }

    Ok((name, value.trim()))
}
