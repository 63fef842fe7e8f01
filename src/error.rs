//! Error types for atv-remote
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur while talking to the control daemon
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The daemon executable could not be started
    #[error("Failed to start daemon: {0}")]
    SpawnFailure(String),

    /// The daemon went away while the request was outstanding
    #[error("Daemon process exited")]
    DaemonExited,

    /// A line from the daemon could not be decoded
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Application error reported by the daemon for one request
    #[error("Daemon error: {0}")]
    Rpc(String),

    /// A result did not have the shape the typed call expects
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// `pair_begin` answered with something other than the PIN sentinel
    #[error("Unexpected pair_begin response: {0}")]
    PairingProtocolViolation(String),

    /// The user declined (or did not complete) PIN entry
    #[error("PIN cancelled")]
    PairingCancelled,

    /// `pair_pin` succeeded but carried no credentials
    #[error("No credentials returned")]
    MissingCredentials,

    /// Neither pairing protocol produced credentials
    #[error("Setup failed for both protocols.")]
    PairingFailed,

    /// Saving collected credentials failed
    #[error("Save error: {0}")]
    Save(String),

    /// Another setup attempt is still running
    #[error("Setup already in progress")]
    SetupInProgress,

    /// A device-scoped call was made without a device
    #[error("No device selected")]
    NoDeviceSelected,

    /// Configuration could not be loaded
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RemoteError {
    /// Whether this failure came from the transport rather than the daemon
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RemoteError::SpawnFailure(_) | RemoteError::DaemonExited | RemoteError::MalformedResponse(_) | RemoteError::Io(_)
        )
    }
}

/// Result type alias for atv-remote operations
pub type Result<T> = std::result::Result<T, RemoteError>;
