//! Pending request table
//!
//! Maps request ids to the completion channel of the waiting caller. One
//! table belongs to one daemon instance; once closed it rejects new entries,
//! so every entry is completed exactly once: by its reply, by its sender
//! discarding it after a failed write, or by the bulk failure on exit.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{RemoteError, Result};
use crate::ipc::messages::ResponseEnvelope;

/// Receives the outcome of one request.
pub type Completion = oneshot::Receiver<Result<Value>>;

#[derive(Default)]
struct Inner {
    entries: HashMap<String, oneshot::Sender<Result<Value>>>,
    closed: bool,
}

/// Id-keyed set of requests awaiting a reply.
#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<Inner>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a request id and get the receiver its caller waits on.
    pub fn register(&self, id: &str) -> Result<Completion> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(RemoteError::DaemonExited);
        }
        match inner.entries.entry(id.to_string()) {
            Entry::Occupied(_) => Err(RemoteError::InvalidResponse(format!("request id {} already pending", id))),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Route a decoded response to its caller.
    ///
    /// Returns false when no entry matches (stale or duplicate reply).
    pub fn complete(&self, response: ResponseEnvelope) -> bool {
        let sender = self.lock().entries.remove(&response.id);
        match sender {
            Some(tx) => {
                // Caller may have gone away; nothing to do then
                let _ = tx.send(response.reply.into_result());
                true
            }
            None => false,
        }
    }

    /// Complete one entry with an error.
    ///
    /// Returns false when the entry is already gone.
    pub fn fail(&self, id: &str, error: RemoteError) -> bool {
        let sender = self.lock().entries.remove(id);
        match sender {
            Some(tx) => {
                let _ = tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Drop an entry without completing it.
    pub fn discard(&self, id: &str) -> bool {
        self.lock().entries.remove(id).is_some()
    }

    /// Close the table and fail every entry with `DaemonExited`.
    ///
    /// Returns how many entries were failed. Later calls fail nothing.
    pub fn fail_all(&self) -> usize {
        let drained = {
            let mut inner = self.lock();
            inner.closed = true;
            std::mem::take(&mut inner.entries)
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(RemoteError::DaemonExited));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids currently waiting, sorted numerically where possible.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().entries.keys().cloned().collect();
        ids.sort_by_key(|id| (id.parse::<u64>().unwrap_or(u64::MAX), id.clone()));
        ids
    }
}
