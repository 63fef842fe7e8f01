//! IPC Layer - line-delimited JSON channel to the control daemon
//!
//! This module provides:
//! - Request/response envelope types
//! - The command vocabulary the daemon understands
//! - A newline-delimited JSON codec for tokio-util framing

pub mod codec;
pub mod messages;

pub use codec::{DEFAULT_MAX_LINE, Inbound, WireCodec, decode_line, decode_request, encode_request};
pub use messages::{Command, RemoteKey, Reply, RequestEnvelope, ResponseEnvelope};
