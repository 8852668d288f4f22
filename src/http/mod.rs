//! HTTP/1.x wire handling
//!
//! Framing, parsing, dispatch and response writing. None of these types touch
//! shared state; the server module owns sockets and concurrency.

mod framer;
mod parser;
mod request;
mod response;
mod router;
mod writer;

pub use framer::{FrameLimits, Framer, HEADER_TERMINATOR};
pub use parser::{parse, ParseLimits};
pub use request::{Headers, Method, Request, HTTP_10, HTTP_11};
pub use response::Response;
pub use router::{handler_fn, FnHandler, Handler, PathMatcher, Router};
pub use writer::{encode, response_version, ResponseWriter};

pub use http::StatusCode;
