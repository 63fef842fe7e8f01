//! Daemon supervision
//!
//! Owns at most one daemon instance at a time. A `DaemonHandle` bundles the
//! process, the outbound request queue, the pending request table and the
//! reader and writer tasks for one spawn; it is replaced wholesale on
//! restart.
//!
//! The writer task drains the queue into the daemon's stdin, so a daemon
//! that stops reading never holds up the supervisor itself. The reader task
//! decodes one line at a time and routes responses to the pending table.
//! When the daemon's output ends (or cannot be read) it fails whatever is
//! still pending with `DaemonExited`. Explicit shutdown fails pending
//! requests first, then terminates the process without waiting on stdin.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::daemon::launcher::{BoxedReader, BoxedWriter, DaemonLauncher, DaemonProcess};
use crate::daemon::pending::PendingTable;
use crate::error::{RemoteError, Result};
use crate::ipc::codec::{Inbound, WireCodec};
use crate::ipc::messages::RequestEnvelope;

type RequestSink = FramedWrite<BoxedWriter, WireCodec>;

/// Lifecycle of the supervised daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// No daemon has been started (or it was shut down)
    Absent,
    /// A spawn is in progress
    Starting,
    /// Running and accepting requests
    Ready,
    /// The daemon went away; the next request restarts it
    Exited,
}

/// One running daemon instance.
pub struct DaemonHandle {
    generation: u64,
    process: Box<dyn DaemonProcess>,
    outbox: Option<mpsc::UnboundedSender<RequestEnvelope>>,
    pending: Arc<PendingTable>,
    next_id: u64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl DaemonHandle {
    /// Spawn number of this instance, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Requests awaiting a reply from this instance.
    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Allocate the next request id. Ids restart at "1" for every instance.
    pub fn next_request_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    /// Queue one request line for the daemon.
    ///
    /// Lines are written in queue order. If writing a line fails, its
    /// pending entry is completed with the I/O error.
    pub fn write(&self, request: RequestEnvelope) -> Result<()> {
        let outbox = self.outbox.as_ref().ok_or(RemoteError::DaemonExited)?;
        outbox.send(request).map_err(|_| RemoteError::DaemonExited)
    }

    fn is_live(&mut self) -> bool {
        !self.pending.is_closed() && !self.process.has_exited()
    }

    async fn teardown(mut self) {
        fail_pending(self.generation, &self.pending);
        self.outbox.take();
        if let Err(e) = self.process.terminate().await {
            debug!("Daemon #{} terminate: {}", self.generation, e);
        }
        self.writer.abort();
        self.reader.abort();
    }
}

/// Keeps a single daemon instance alive on demand.
pub struct DaemonSupervisor {
    launcher: Arc<dyn DaemonLauncher>,
    slot: Mutex<Option<DaemonHandle>>,
    spawns: AtomicU64,
    starting: AtomicBool,
}

impl DaemonSupervisor {
    /// Create a supervisor. Nothing is spawned until first use.
    pub fn new(launcher: Arc<dyn DaemonLauncher>) -> Self {
        Self {
            launcher,
            slot: Mutex::new(None),
            spawns: AtomicU64::new(0),
            starting: AtomicBool::new(false),
        }
    }

    /// Make sure a live daemon exists, starting one if needed.
    pub async fn ensure_running(&self) -> Result<()> {
        self.acquire().await.map(|_| ())
    }

    /// Lock the live daemon handle, starting a daemon if needed.
    ///
    /// The returned guard serializes access: requests queued while it is
    /// held reach the daemon in acquisition order.
    pub async fn acquire(&self) -> Result<MappedMutexGuard<'_, DaemonHandle>> {
        let mut slot = self.slot.lock().await;

        let live = slot.as_mut().is_some_and(DaemonHandle::is_live);
        if !live {
            if let Some(stale) = slot.take() {
                info!("Daemon #{} is gone, restarting", stale.generation);
                stale.teardown().await;
            }

            self.starting.store(true, Ordering::SeqCst);
            let spawned = self.spawn().await;
            self.starting.store(false, Ordering::SeqCst);
            *slot = Some(spawned?);
        }

        MutexGuard::try_map(slot, |slot| slot.as_mut()).map_err(|_| RemoteError::DaemonExited)
    }

    async fn spawn(&self) -> Result<DaemonHandle> {
        let launched = self.launcher.launch().await.map_err(|e| match e {
            RemoteError::SpawnFailure(_) => e,
            other => RemoteError::SpawnFailure(other.to_string()),
        })?;

        let generation = self.spawns.fetch_add(1, Ordering::SeqCst) + 1;
        let pending = Arc::new(PendingTable::new());
        let (outbox, queue) = mpsc::unbounded_channel();
        let sink = FramedWrite::new(launched.writer, WireCodec::new());
        let frames = FramedRead::new(launched.reader, WireCodec::new());

        let writer = tokio::spawn(write_loop(generation, sink, queue, Arc::clone(&pending)));
        let reader = tokio::spawn(read_loop(generation, frames, Arc::clone(&pending)));

        info!("Daemon #{} started via {}", generation, self.launcher.describe());

        Ok(DaemonHandle {
            generation,
            process: launched.process,
            outbox: Some(outbox),
            pending,
            next_id: 0,
            reader,
            writer,
        })
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> HandleState {
        if self.starting.load(Ordering::SeqCst) {
            return HandleState::Starting;
        }
        let mut slot = self.slot.lock().await;
        match slot.as_mut() {
            None => HandleState::Absent,
            Some(handle) => {
                if handle.is_live() {
                    HandleState::Ready
                } else {
                    HandleState::Exited
                }
            }
        }
    }

    /// Number of daemons spawned so far.
    pub fn spawn_count(&self) -> u64 {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Ids of requests waiting on the current daemon.
    pub async fn pending_ids(&self) -> Vec<String> {
        let slot = self.slot.lock().await;
        slot.as_ref().map(|h| h.pending.ids()).unwrap_or_default()
    }

    /// Tear down the current daemon, failing pending requests and
    /// terminating the process.
    pub async fn shutdown(&self) {
        let handle = self.slot.lock().await.take();
        if let Some(handle) = handle {
            info!("Shutting down daemon #{}", handle.generation);
            handle.teardown().await;
        }
    }
}

async fn write_loop(
    generation: u64,
    mut sink: RequestSink,
    mut queue: mpsc::UnboundedReceiver<RequestEnvelope>,
    pending: Arc<PendingTable>,
) {
    while let Some(request) = queue.recv().await {
        let id = request.id.clone();
        if let Err(e) = sink.send(request).await {
            warn!("Daemon #{}: writing request {} failed: {}", generation, id, e);
            pending.fail(&id, RemoteError::Io(e));
        }
    }

    if let Err(e) = sink.close().await {
        debug!("Daemon #{}: closing stdin: {}", generation, e);
    }
}

async fn read_loop(generation: u64, mut frames: FramedRead<BoxedReader, WireCodec>, pending: Arc<PendingTable>) {
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Inbound::Response(response)) => {
                let id = response.id.clone();
                if !pending.complete(response) {
                    debug!("Daemon #{}: no pending request {}, reply dropped", generation, id);
                }
            }
            Ok(Inbound::Malformed(reason)) => {
                warn!("Daemon #{}: discarding malformed line: {}", generation, reason);
            }
            Err(e) => {
                warn!("Daemon #{} read error: {}", generation, e);
                break;
            }
        }
    }

    info!("Daemon #{} closed its output", generation);
    fail_pending(generation, &pending);
}

fn fail_pending(generation: u64, pending: &PendingTable) {
    let failed = pending.fail_all();
    if failed > 0 {
        warn!("Daemon #{} exited with {} request(s) pending", generation, failed);
    }
}
