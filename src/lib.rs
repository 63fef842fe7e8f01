//! atv-remote - client core for an Apple TV control daemon
//!
//! The daemon runs as a child process and speaks line-delimited JSON on its
//! stdin/stdout. This crate keeps it running, multiplexes concurrent
//! requests over that one channel, pairs new devices interactively and
//! polls now-playing state for the selected device.

pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod ipc;
pub mod pairing;
pub mod poll;

pub use daemon::DaemonClient;
pub use error::{RemoteError, Result};
