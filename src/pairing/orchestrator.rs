//! Two-protocol device setup
//!
//! `setup_device` pairs `mrp` and then `companion`, one after the other.
//! Each attempt runs to completion regardless of how the other one went;
//! a cancelled PIN counts as a failure of that attempt only. If at least
//! one protocol produced credentials they are saved together, otherwise
//! the setup fails and nothing is saved.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use serde_json::Value;

use crate::config::PairingConfig;
use crate::daemon::DaemonClient;
use crate::error::{RemoteError, Result};
use crate::pairing::machine::{Attempt, AttemptEvent, Protocol, begin_wants_pin, credentials_in};
use crate::pairing::prompt::{PinInput, PinPrompt};
use crate::pairing::store::{CredentialStore, Credentials, DaemonCredentialStore};

/// The daemon calls pairing depends on.
#[async_trait]
pub trait PairingTransport: Send + Sync {
    async fn pair_begin(&self, device_id: &str, address: &str, protocol: Protocol) -> Result<Value>;
    async fn pair_pin(&self, device_id: &str, pin: &str) -> Result<Value>;
}

#[async_trait]
impl PairingTransport for DaemonClient {
    async fn pair_begin(&self, device_id: &str, address: &str, protocol: Protocol) -> Result<Value> {
        DaemonClient::pair_begin(self, device_id, address, protocol).await
    }

    async fn pair_pin(&self, device_id: &str, pin: &str) -> Result<Value> {
        DaemonClient::pair_pin(self, device_id, pin).await
    }
}

/// How one protocol attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Succeeded,
    Failed(String),
    Cancelled,
}

impl AttemptResult {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptResult::Succeeded)
    }
}

/// State of one `setup_device` call.
#[derive(Debug, Clone)]
pub struct PairingSession {
    pub device_id: String,
    pub address: String,
    pub name: String,
    credentials: Credentials,
    results: BTreeMap<Protocol, AttemptResult>,
}

impl PairingSession {
    pub fn new(device_id: &str, address: &str, name: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            address: address.to_string(),
            name: name.to_string(),
            credentials: Credentials::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn record_success(&mut self, protocol: Protocol, credentials: String) {
        self.credentials.insert(protocol, credentials);
        self.results.insert(protocol, AttemptResult::Succeeded);
    }

    pub fn record_failure(&mut self, protocol: Protocol, error: &RemoteError) {
        let result = match error {
            RemoteError::PairingCancelled => AttemptResult::Cancelled,
            other => AttemptResult::Failed(other.to_string()),
        };
        self.results.insert(protocol, result);
    }

    pub fn any_succeeded(&self) -> bool {
        !self.credentials.is_empty()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn results(&self) -> &BTreeMap<Protocol, AttemptResult> {
        &self.results
    }
}

/// Outcome of a successful setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupReport {
    pub device_id: String,
    pub results: BTreeMap<Protocol, AttemptResult>,
    /// Protocols whose credentials were saved
    pub saved: Vec<Protocol>,
}

impl SetupReport {
    pub fn summary(&self) -> &'static str {
        "Setup complete."
    }

    pub fn result(&self, protocol: Protocol) -> Option<&AttemptResult> {
        self.results.get(&protocol)
    }
}

/// Clears the single-flight flag when a setup ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives device setup across both protocols.
pub struct PairingOrchestrator {
    transport: Arc<dyn PairingTransport>,
    prompt: Arc<dyn PinPrompt>,
    store: Arc<dyn CredentialStore>,
    pin_timeout: Option<Duration>,
    in_progress: AtomicBool,
}

impl PairingOrchestrator {
    pub fn new(transport: Arc<dyn PairingTransport>, prompt: Arc<dyn PinPrompt>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            transport,
            prompt,
            store,
            pin_timeout: None,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Pair through the daemon and save with `pair_save`.
    pub fn for_client(client: Arc<DaemonClient>, prompt: Arc<dyn PinPrompt>, config: &PairingConfig) -> Self {
        let store = Arc::new(DaemonCredentialStore::new(Arc::clone(&client)));
        Self::new(client, prompt, store).with_pin_timeout(config.pin_timeout())
    }

    /// Give up on a PIN prompt after `timeout`, treating it as cancelled.
    pub fn with_pin_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pin_timeout = timeout;
        self
    }

    /// Whether a setup is currently running.
    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Pair both protocols with a device and save whatever was obtained.
    ///
    /// Fails with `PairingFailed` when neither protocol succeeded, with
    /// `Save` when saving failed, and with `SetupInProgress` when another
    /// setup is still running.
    pub async fn setup_device(&self, device_id: &str, address: &str, name: &str) -> Result<SetupReport> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RemoteError::SetupInProgress);
        }
        let _flight = FlightGuard(&self.in_progress);

        info!("Setting up {} ({}) at {}", name, device_id, address);
        let mut session = PairingSession::new(device_id, address, name);

        for protocol in Protocol::ALL {
            match self.pair_protocol(&session, protocol).await {
                Ok(credentials) => {
                    info!("Paired {} with {}", protocol, device_id);
                    session.record_success(protocol, credentials);
                }
                Err(e) => {
                    warn!("Pairing {} with {} did not complete: {}", protocol, device_id, e);
                    session.record_failure(protocol, &e);
                }
            }
        }

        if !session.any_succeeded() {
            return Err(RemoteError::PairingFailed);
        }

        self.store
            .save(&session.device_id, &session.address, &session.name, session.credentials())
            .await
            .map_err(|e| match e {
                RemoteError::Rpc(message) => RemoteError::Save(message),
                other => RemoteError::Save(other.to_string()),
            })?;

        Ok(SetupReport {
            device_id: session.device_id.clone(),
            results: session.results().clone(),
            saved: session.credentials().keys().copied().collect(),
        })
    }

    async fn pair_protocol(&self, session: &PairingSession, protocol: Protocol) -> Result<String> {
        let mut attempt = Attempt::new(protocol);

        attempt.apply(AttemptEvent::Start);
        let begin = self
            .transport
            .pair_begin(&session.device_id, &session.address, protocol)
            .await;
        match begin {
            Ok(result) if begin_wants_pin(&result) => {
                attempt.apply(AttemptEvent::BeginAccepted);
            }
            Ok(result) => {
                let error = RemoteError::PairingProtocolViolation(result.to_string());
                attempt.apply(AttemptEvent::BeginRejected(error.to_string()));
                return Err(error);
            }
            Err(e) => {
                attempt.apply(AttemptEvent::BeginRejected(e.to_string()));
                return Err(e);
            }
        }

        let pin = match self.ask_pin(protocol).await {
            PinInput::Pin(pin) if !pin.trim().is_empty() => pin,
            _ => {
                attempt.apply(AttemptEvent::PinCancelled);
                return Err(RemoteError::PairingCancelled);
            }
        };

        attempt.apply(AttemptEvent::PinEntered);
        let verified = self
            .transport
            .pair_pin(&session.device_id, &pin)
            .await
            .and_then(|result| credentials_in(&result).ok_or(RemoteError::MissingCredentials));

        match verified {
            Ok(credentials) => {
                attempt.apply(AttemptEvent::Verified);
                Ok(credentials)
            }
            Err(e) => {
                attempt.apply(AttemptEvent::VerifyRejected(e.to_string()));
                Err(e)
            }
        }
    }

    async fn ask_pin(&self, protocol: Protocol) -> PinInput {
        match self.pin_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.prompt.prompt(protocol)).await {
                Ok(input) => input,
                Err(_) => {
                    warn!("No {} PIN entered within {:?}", protocol, limit);
                    PinInput::Cancelled
                }
            },
            None => self.prompt.prompt(protocol).await,
        }
    }
}
