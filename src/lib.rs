//! Pylon - concurrent HTTP/1.x server core
//!
//! Framing, parsing, dispatch and response writing over tokio, with a
//! bounded connection registry and signal-driven graceful drain.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod http;
pub mod server;

pub use error::{PylonError, Result};
