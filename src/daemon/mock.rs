//! In-memory daemon for tests
//!
//! `MockLauncher` hands out daemons connected through `tokio::io::duplex`
//! pipes instead of a child process. In manual mode each launched
//! `MockDaemon` is queued for the test to drive; in serving mode a task
//! answers every request through a handler closure.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::mpsc;

use crate::daemon::launcher::{DaemonLauncher, DaemonProcess, LaunchedDaemon};
use crate::error::{RemoteError, Result};
use crate::ipc::codec::decode_request;
use crate::ipc::messages::{Reply, RequestEnvelope, ResponseEnvelope};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Answers one request; `None` leaves it unanswered.
pub type Handler = Arc<dyn Fn(&RequestEnvelope) -> Option<Reply> + Send + Sync>;

type RequestLog = Arc<Mutex<Vec<RequestEnvelope>>>;

#[derive(Default)]
struct ProcessState {
    exited: AtomicBool,
    terminated: AtomicBool,
}

struct MockProcess {
    pid: u32,
    state: Arc<ProcessState>,
}

#[async_trait]
impl DaemonProcess for MockProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn has_exited(&mut self) -> bool {
        self.state.exited.load(Ordering::SeqCst)
    }

    async fn terminate(&mut self) -> Result<()> {
        self.state.terminated.store(true, Ordering::SeqCst);
        self.state.exited.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Launcher producing in-memory daemons.
pub struct MockLauncher {
    launches: AtomicUsize,
    failing: AtomicBool,
    handler: Option<Handler>,
    requests: RequestLog,
    daemons_tx: mpsc::UnboundedSender<MockDaemon>,
    daemons_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockDaemon>>,
}

impl MockLauncher {
    /// Manual mode: fetch each launched daemon with `next_daemon`.
    pub fn new() -> Self {
        let (daemons_tx, daemons_rx) = mpsc::unbounded_channel();
        Self {
            launches: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            handler: None,
            requests: Arc::new(Mutex::new(Vec::new())),
            daemons_tx,
            daemons_rx: tokio::sync::Mutex::new(daemons_rx),
        }
    }

    /// Serving mode: every request is answered by `handler`.
    pub fn serving<F>(handler: F) -> Self
    where
        F: Fn(&RequestEnvelope) -> Option<Reply> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Arc::new(handler)),
            ..Self::new()
        }
    }

    /// Make subsequent launches fail with `SpawnFailure`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Launch attempts so far, failed ones included.
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Every request received so far, across all daemons.
    pub fn requests(&self) -> Vec<RequestEnvelope> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Commands received so far, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.cmd).collect()
    }

    /// Wait for the next daemon launched in manual mode.
    pub async fn next_daemon(&self) -> Option<MockDaemon> {
        self.daemons_rx.lock().await.recv().await
    }
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DaemonLauncher for MockLauncher {
    async fn launch(&self) -> Result<LaunchedDaemon> {
        let attempt = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::SpawnFailure("mock daemon refused to start".into()));
        }

        let (client_writer, daemon_input) = tokio::io::duplex(PIPE_CAPACITY);
        let (daemon_output, client_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let state = Arc::new(ProcessState::default());

        let daemon = MockDaemon {
            input: Some(BufReader::new(daemon_input).lines()),
            output: Some(daemon_output),
            state: Arc::clone(&state),
            log: Arc::clone(&self.requests),
        };

        match &self.handler {
            Some(handler) => {
                tokio::spawn(daemon.serve(Arc::clone(handler)));
            }
            None => {
                // Receiver lives as long as self
                let _ = self.daemons_tx.send(daemon);
            }
        }

        Ok(LaunchedDaemon {
            writer: Box::new(client_writer),
            reader: Box::new(client_reader),
            process: Box::new(MockProcess {
                pid: 40_000 + attempt as u32,
                state,
            }),
        })
    }

    fn describe(&self) -> String {
        "mock daemon".to_string()
    }
}

/// The daemon side of an in-memory channel.
///
/// Dropping it closes both pipes, which the client sees as end-of-stream.
pub struct MockDaemon {
    input: Option<Lines<BufReader<DuplexStream>>>,
    output: Option<DuplexStream>,
    state: Arc<ProcessState>,
    log: RequestLog,
}

impl MockDaemon {
    /// Next raw request line, or `None` once the client closed its side.
    pub async fn recv_raw(&mut self) -> Option<String> {
        let input = self.input.as_mut()?;
        input.next_line().await.ok().flatten()
    }

    /// Next request, decoded and recorded.
    pub async fn recv(&mut self) -> Option<RequestEnvelope> {
        let line = self.recv_raw().await?;
        let request = decode_request(&line).ok()?;
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        Some(request)
    }

    /// Write one raw line to the client.
    pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await
    }

    pub async fn reply(&mut self, response: &ResponseEnvelope) -> io::Result<()> {
        self.send_line(&response.to_value().to_string()).await
    }

    pub async fn reply_ok(&mut self, id: &str, result: Value) -> io::Result<()> {
        self.reply(&ResponseEnvelope::success(id, result)).await
    }

    pub async fn reply_err(&mut self, id: &str, message: &str) -> io::Result<()> {
        self.reply(&ResponseEnvelope::error(id, message)).await
    }

    /// Stop reading requests; client writes then fail with a broken pipe.
    pub fn close_input(&mut self) {
        self.input = None;
    }

    /// Simulate the process exiting.
    pub fn exit(self) {
        self.state.exited.store(true, Ordering::SeqCst);
    }

    /// Report the process as exited while leaving both pipes open.
    pub fn mark_exited(&self) {
        self.state.exited.store(true, Ordering::SeqCst);
    }

    /// Whether the client asked this daemon to terminate.
    pub fn was_terminated(&self) -> bool {
        self.state.terminated.load(Ordering::SeqCst)
    }

    async fn serve(mut self, handler: Handler) {
        while let Some(request) = self.recv().await {
            let Some(reply) = handler(&request) else {
                continue;
            };
            let response = ResponseEnvelope { id: request.id, reply };
            if self.reply(&response).await.is_err() {
                break;
            }
        }
    }
}
