//! Typed shapes of daemon results.
//!
//! Every field the daemon may omit has a serde default so an older or newer
//! daemon never turns a reply into an `InvalidResponse`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A configured or discovered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    /// Only present on scan results: whether the device is already configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known: Option<bool>,
}

impl Device {
    /// Name to show, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    /// Whether a scan reported this device as not yet configured.
    pub fn needs_setup(&self) -> bool {
        self.known == Some(false)
    }
}

/// Result of `list_devices` and `scan_devices`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceList {
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub selected: Option<String>,
}

impl DeviceList {
    /// Look up a device by id.
    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// The saved selection, or the first device when nothing is selected.
    pub fn effective_selection(&self) -> Option<&str> {
        self.selected
            .as_deref()
            .or_else(|| self.devices.first().map(|d| d.id.as_str()))
    }
}

/// Result of `power_state`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerStatus {
    #[serde(default)]
    pub on: bool,
}

/// Locally cached power state of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// Not checked yet
    #[default]
    Pending,
    On,
    Off,
    /// The last check failed
    Unavailable,
}

impl PowerState {
    pub fn from_on(on: bool) -> Self {
        if on { PowerState::On } else { PowerState::Off }
    }

    /// The device answered a power query (on or off).
    pub fn is_reachable(&self) -> bool {
        matches!(self, PowerState::On | PowerState::Off)
    }

    /// Command that flips this state: `power_off` only when known to be on.
    pub fn toggled(&self) -> PowerState {
        match self {
            PowerState::On => PowerState::Off,
            _ => PowerState::On,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PowerState::Pending => "connecting…",
            PowerState::On => "on",
            PowerState::Off => "off",
            PowerState::Unavailable => "unavailable",
        }
    }
}

/// Result of `get_metadata`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    #[serde(default)]
    pub device_state: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub series: String,
    #[serde(default)]
    pub position: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub app_id: Option<String>,
}

impl NowPlaying {
    /// Whether there is anything worth showing.
    pub fn has_content(&self) -> bool {
        !self.title.is_empty()
    }

    /// `position / duration`, when both are known and non-zero.
    pub fn progress_label(&self) -> Option<String> {
        match (self.position, self.duration) {
            (Some(pos), Some(dur)) if pos > 0.0 && dur > 0.0 => {
                Some(format!("{} / {}", format_time(pos), format_time(dur)))
            }
            _ => None,
        }
    }
}

/// Format seconds as `m:ss`, or `h:mm:ss` past the hour.
pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Result of `get_artwork`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artwork {
    #[serde(default)]
    pub artwork_path: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

/// An installed app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Result of `list_apps`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppList {
    #[serde(default)]
    pub apps: Vec<App>,
}

/// Result of the volume commands. `None` when the device could not report it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Result of `get_config_value`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigValue {
    #[serde(default)]
    pub value: Value,
}
