//! Daemon launching
//!
//! Defines the DaemonLauncher trait that produces a running daemon plus its
//! two pipe endpoints, and ProcessLauncher which runs the real executable.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};

use crate::config::DaemonConfig;
use crate::error::{RemoteError, Result};

/// Writable end of the daemon channel (the daemon's stdin).
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable end of the daemon channel (the daemon's stdout).
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Control over a launched daemon instance.
#[async_trait]
pub trait DaemonProcess: Send + Sync {
    /// OS process id, if any.
    fn id(&self) -> Option<u32>;

    /// Whether the process is known to have exited.
    fn has_exited(&mut self) -> bool;

    /// Ask the process to terminate and reap it.
    async fn terminate(&mut self) -> Result<()>;
}

/// A freshly launched daemon with its pipes.
pub struct LaunchedDaemon {
    pub writer: BoxedWriter,
    pub reader: BoxedReader,
    pub process: Box<dyn DaemonProcess>,
}

/// Trait for starting daemon instances
#[async_trait]
pub trait DaemonLauncher: Send + Sync {
    /// Start a new daemon. Failures are reported as `SpawnFailure`.
    async fn launch(&self) -> Result<LaunchedDaemon>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Launches the configured daemon executable as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    /// Create a launcher for the given executable
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Create a launcher from the daemon config section
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(&config.path).with_args(config.args.clone())
    }

    /// Add command-line arguments
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl DaemonLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<LaunchedDaemon> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RemoteError::SpawnFailure(format!("{}: {}", self.program.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RemoteError::SpawnFailure("daemon stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RemoteError::SpawnFailure("daemon stdout not captured".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let pid = child.id();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("daemon[{:?}] stderr: {}", pid, line);
                }
            });
        }

        info!("Spawned daemon {} (pid {:?})", self.program.display(), child.id());

        Ok(LaunchedDaemon {
            writer: Box::new(stdin),
            reader: Box::new(stdout),
            process: Box::new(child),
        })
    }

    fn describe(&self) -> String {
        self.program.display().to_string()
    }
}

#[async_trait]
impl DaemonProcess for Child {
    fn id(&self) -> Option<u32> {
        Child::id(self)
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.try_wait(), Ok(None))
    }

    async fn terminate(&mut self) -> Result<()> {
        if let Ok(Some(status)) = self.try_wait() {
            debug!("Daemon already exited with {}", status);
            return Ok(());
        }
        self.kill().await?;
        Ok(())
    }
}
