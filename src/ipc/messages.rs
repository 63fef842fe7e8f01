//! Wire message types for client ↔ daemon communication.
//!
//! One JSON object per line in each direction. Requests carry a string id,
//! a command name and positional arguments; responses echo the id and carry
//! exactly one of `result` or `error`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RemoteError;

/// Request sent from the client to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id, unique among pending requests.
    pub id: String,
    /// Command name (e.g. "list_devices", "pair_begin").
    pub cmd: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl RequestEnvelope {
    /// Create a request. `null` arguments are dropped.
    pub fn new(id: impl Into<String>, cmd: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            cmd: cmd.into(),
            args: args.into_iter().filter(|a| !a.is_null()).collect(),
        }
    }

    /// Create a request with no arguments.
    pub fn no_args(id: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self::new(id, cmd, Vec::new())
    }
}

/// Outcome carried by a response line.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `{"result": ...}`
    Result(Value),
    /// `{"error": "..."}`
    Error(String),
}

impl Reply {
    /// Collapse into the completion type handed to callers.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self {
            Reply::Result(value) => Ok(value),
            Reply::Error(message) => Err(RemoteError::Rpc(message)),
        }
    }

    /// Check if this reply indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, Reply::Result(_))
    }
}

/// Response sent from the daemon to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    /// Id of the request this answers.
    pub id: String,
    /// Success value or daemon error message.
    pub reply: Reply,
}

impl ResponseEnvelope {
    /// Create a success response.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            reply: Reply::Result(result),
        }
    }

    /// Create an error response.
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reply: Reply::Error(message.into()),
        }
    }

    /// Interpret a decoded JSON value as a response.
    ///
    /// The id may be a string or a number. An `error` member that is present
    /// and not null wins over `result`; a line with neither is rejected.
    pub fn from_value(value: Value) -> Result<Self, RemoteError> {
        let Value::Object(mut obj) = value else {
            return Err(RemoteError::MalformedResponse("not a JSON object".into()));
        };

        let id = match obj.remove("id") {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(RemoteError::MalformedResponse(format!("unrecognized id: {}", other)));
            }
            None => return Err(RemoteError::MalformedResponse("missing id".into())),
        };

        match (obj.remove("error"), obj.remove("result")) {
            (Some(err), _) if !err.is_null() => {
                let message = match err {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Ok(Self::error(id, message))
            }
            (_, Some(result)) => Ok(Self::success(id, result)),
            _ => Err(RemoteError::MalformedResponse(format!(
                "response {} has neither result nor error",
                id
            ))),
        }
    }

    /// Render back to wire JSON.
    pub fn to_value(&self) -> Value {
        match &self.reply {
            Reply::Result(result) => serde_json::json!({ "id": self.id, "result": result }),
            Reply::Error(message) => serde_json::json!({ "id": self.id, "error": message }),
        }
    }
}

/// Single-word remote-control directives understood by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum RemoteKey {
    Up,
    Down,
    Left,
    Right,
    Select,
    SelectHold,
    Menu,
    Home,
    TopMenu,
    PlayPause,
    Stop,
    VolumeUp,
    VolumeDown,
    SkipPrev,
    SkipNext,
    NextTrack,
    PrevTrack,
}

impl RemoteKey {
    /// Every directive, in display order.
    pub const ALL: [RemoteKey; 17] = [
        RemoteKey::Up,
        RemoteKey::Down,
        RemoteKey::Left,
        RemoteKey::Right,
        RemoteKey::Select,
        RemoteKey::SelectHold,
        RemoteKey::Menu,
        RemoteKey::Home,
        RemoteKey::TopMenu,
        RemoteKey::PlayPause,
        RemoteKey::Stop,
        RemoteKey::VolumeUp,
        RemoteKey::VolumeDown,
        RemoteKey::SkipPrev,
        RemoteKey::SkipNext,
        RemoteKey::NextTrack,
        RemoteKey::PrevTrack,
    ];

    /// Wire name of the directive.
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteKey::Up => "up",
            RemoteKey::Down => "down",
            RemoteKey::Left => "left",
            RemoteKey::Right => "right",
            RemoteKey::Select => "select",
            RemoteKey::SelectHold => "select_hold",
            RemoteKey::Menu => "menu",
            RemoteKey::Home => "home",
            RemoteKey::TopMenu => "top_menu",
            RemoteKey::PlayPause => "play_pause",
            RemoteKey::Stop => "stop",
            RemoteKey::VolumeUp => "volume_up",
            RemoteKey::VolumeDown => "volume_down",
            RemoteKey::SkipPrev => "skip_prev",
            RemoteKey::SkipNext => "skip_next",
            RemoteKey::NextTrack => "next_track",
            RemoteKey::PrevTrack => "prev_track",
        }
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteKey {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RemoteKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| RemoteError::InvalidResponse(format!("unknown remote key: {}", s)))
    }
}

/// Commands recognized by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ListDevices,
    ScanDevices,
    SelectDevice,
    RemoveDevice,
    PairBegin,
    PairPin,
    PairSave,
    PowerState,
    PowerOn,
    PowerOff,
    GetMetadata,
    GetArtwork,
    ListApps,
    LaunchApp,
    KeyboardSet,
    GetVolume,
    SetVolume,
    VolumeMute,
    GetConfigValue,
    SetConfigValue,
    Remote(RemoteKey),
}

impl Command {
    /// Wire name of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::ListDevices => "list_devices",
            Command::ScanDevices => "scan_devices",
            Command::SelectDevice => "select_device",
            Command::RemoveDevice => "remove_device",
            Command::PairBegin => "pair_begin",
            Command::PairPin => "pair_pin",
            Command::PairSave => "pair_save",
            Command::PowerState => "power_state",
            Command::PowerOn => "power_on",
            Command::PowerOff => "power_off",
            Command::GetMetadata => "get_metadata",
            Command::GetArtwork => "get_artwork",
            Command::ListApps => "list_apps",
            Command::LaunchApp => "launch_app",
            Command::KeyboardSet => "keyboard_set",
            Command::GetVolume => "get_volume",
            Command::SetVolume => "set_volume",
            Command::VolumeMute => "volume_mute",
            Command::GetConfigValue => "get_config_value",
            Command::SetConfigValue => "set_config_value",
            Command::Remote(key) => key.as_str(),
        }
    }

    /// Whether the command needs a device id as its first argument.
    pub fn is_device_scoped(&self) -> bool {
        !matches!(
            self,
            Command::ListDevices | Command::ScanDevices | Command::PairSave
        )
    }
}

impl AsRef<str> for Command {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
