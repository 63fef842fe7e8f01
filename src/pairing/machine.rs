//! Per-protocol pairing state machine
//!
//! One attempt walks `Idle → AwaitingBegin → WaitingForPin → VerifyingPin`
//! and ends in `Succeeded`, `Failed` or `Cancelled`. Transitions are a pure
//! function of (state, event); anything not listed is rejected and leaves
//! the state unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status value `pair_begin` returns when the device is showing a PIN.
pub const PIN_SENTINEL: &str = "waiting_for_pin";

/// Pairing protocols, in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Mrp,
    Companion,
}

impl Protocol {
    pub const ALL: [Protocol; 2] = [Protocol::Mrp, Protocol::Companion];

    /// Wire name passed to `pair_begin`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Mrp => "mrp",
            Protocol::Companion => "companion",
        }
    }

    /// Name shown when asking for the PIN.
    pub fn label(&self) -> &'static str {
        match self {
            Protocol::Mrp => "MRP",
            Protocol::Companion => "Companion",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a `pair_begin` status means "show the PIN prompt".
pub fn is_pin_sentinel(status: &str) -> bool {
    status == PIN_SENTINEL || status == "waiting for pin"
}

/// Whether a whole `pair_begin` result carries the PIN sentinel.
pub fn begin_wants_pin(result: &Value) -> bool {
    result
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(is_pin_sentinel)
}

/// Credentials carried by a `pair_pin` result, if any.
pub fn credentials_in(result: &Value) -> Option<String> {
    match result.get("credentials")? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// State of one protocol attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    AwaitingBegin,
    WaitingForPin,
    VerifyingPin,
    Succeeded,
    Failed(String),
    Cancelled,
}

/// Inputs that drive an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptEvent {
    /// `pair_begin` was sent
    Start,
    /// `pair_begin` answered with the PIN sentinel
    BeginAccepted,
    /// `pair_begin` failed or answered with something else
    BeginRejected(String),
    /// The user supplied a PIN and `pair_pin` was sent
    PinEntered,
    /// The user declined to enter a PIN
    PinCancelled,
    /// `pair_pin` returned credentials
    Verified,
    /// `pair_pin` failed or returned no credentials
    VerifyRejected(String),
}

impl AttemptState {
    /// Next state for `event`, or `None` if the event is not valid here.
    pub fn next(&self, event: &AttemptEvent) -> Option<AttemptState> {
        use AttemptEvent as E;
        use AttemptState as S;

        match (self, event) {
            (S::Idle, E::Start) => Some(S::AwaitingBegin),
            (S::AwaitingBegin, E::BeginAccepted) => Some(S::WaitingForPin),
            (S::AwaitingBegin, E::BeginRejected(reason)) => Some(S::Failed(reason.clone())),
            (S::WaitingForPin, E::PinEntered) => Some(S::VerifyingPin),
            (S::WaitingForPin, E::PinCancelled) => Some(S::Cancelled),
            (S::VerifyingPin, E::Verified) => Some(S::Succeeded),
            (S::VerifyingPin, E::VerifyRejected(reason)) => Some(S::Failed(reason.clone())),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Succeeded | AttemptState::Failed(_) | AttemptState::Cancelled)
    }
}

/// One protocol attempt and the path it took.
#[derive(Debug, Clone)]
pub struct Attempt {
    protocol: Protocol,
    state: AttemptState,
    history: Vec<AttemptState>,
}

impl Attempt {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            state: AttemptState::Idle,
            history: vec![AttemptState::Idle],
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    /// States visited so far, starting with `Idle`.
    pub fn history(&self) -> &[AttemptState] {
        &self.history
    }

    /// Apply an event. Returns false (state unchanged) if it is not valid.
    pub fn apply(&mut self, event: AttemptEvent) -> bool {
        match self.state.next(&event) {
            Some(next) => {
                log::debug!("pairing {}: {:?} -> {:?}", self.protocol, self.state, next);
                self.history.push(next.clone());
                self.state = next;
                true
            }
            None => {
                log::warn!("pairing {}: ignoring {:?} in {:?}", self.protocol, event, self.state);
                false
            }
        }
    }
}
