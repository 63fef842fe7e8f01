//! Device pairing
//!
//! Setting up a device pairs two protocols in turn, each with its own PIN:
//! - `machine`: per-protocol attempt states and the transition function
//! - `prompt`: how PINs are collected from the user
//! - `store`: where the resulting credentials are saved
//! - `orchestrator`: runs both attempts and aggregates the outcome

pub mod machine;
pub mod orchestrator;
pub mod prompt;
pub mod store;

pub use machine::{Attempt, AttemptEvent, AttemptState, PIN_SENTINEL, Protocol, is_pin_sentinel};
pub use orchestrator::{AttemptResult, PairingOrchestrator, PairingSession, PairingTransport, SetupReport};
pub use prompt::{LinePinPrompt, PinInput, PinPrompt};
pub use store::{CredentialStore, Credentials, DaemonCredentialStore};
