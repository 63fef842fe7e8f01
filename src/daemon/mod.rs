//! Daemon Core - process supervision and request multiplexing
//!
//! The control daemon is a long-lived child process that:
//! - Is started lazily on the first request and restarted after it exits
//! - Reads one JSON request per line on stdin
//! - Answers each request, in any order, with one JSON line on stdout

pub mod client;
pub mod launcher;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod pending;
pub mod supervisor;

pub use client::DaemonClient;
pub use launcher::{BoxedReader, BoxedWriter, DaemonLauncher, DaemonProcess, LaunchedDaemon, ProcessLauncher};
pub use pending::{Completion, PendingTable};
pub use supervisor::{DaemonHandle, DaemonSupervisor, HandleState};
