//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - devices/scan/select/remove: device management
//! - setup: pair a device (prompts for PINs)
//! - power/key/apps/launch/type/volume: control the selected device
//! - now-playing/watch: metadata, once or continuously

use atv_remote::ipc::RemoteKey;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// atv-remote - control an Apple TV through its control daemon
#[derive(Parser, Debug)]
#[command(name = "atv-remote")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Device id to act on (defaults to the saved selection)
    #[arg(short, long, global = true)]
    pub device: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List configured devices
    Devices,

    /// Scan the network for devices
    Scan,

    /// Make a device the default target
    Select {
        /// Device id
        id: String,
    },

    /// Forget a configured device
    Remove {
        /// Device id
        id: String,
    },

    /// Pair a device over both protocols
    Setup {
        /// Device id (as reported by scan)
        id: String,

        /// Device IP address
        address: String,

        /// Display name (defaults to the id)
        name: Option<String>,
    },

    /// Show or change power state
    Power {
        #[arg(value_enum, default_value_t = PowerAction::Status)]
        action: PowerAction,
    },

    /// Send a remote-control key
    Key {
        #[arg(value_enum)]
        key: RemoteKey,
    },

    /// List installed apps
    Apps,

    /// Launch an app by bundle id
    Launch {
        /// Bundle id, e.g. com.apple.TVWatchList
        bundle_id: String,
    },

    /// Replace the text of the focused on-screen text field
    Type {
        text: String,
    },

    /// Show what is playing
    #[command(visible_alias = "np")]
    NowPlaying,

    /// Follow now-playing and power state until interrupted
    Watch {
        /// Poll interval in milliseconds (overrides config)
        #[arg(short, long)]
        interval_ms: Option<u64>,
    },

    /// Show, set or mute the volume
    Volume {
        /// Level from 0 to 100
        level: Option<f64>,

        /// Toggle mute
        #[arg(short, long, conflicts_with = "level")]
        mute: bool,
    },

    /// Per-device settings stored by the daemon
    Pref {
        #[command(subcommand)]
        command: PrefCommands,
    },
}

/// Power subcommand actions
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Status,
    On,
    Off,
    Toggle,
}

/// Per-device setting subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum PrefCommands {
    /// Read a setting
    Get {
        key: String,
    },

    /// Write a setting (value parsed as JSON, falling back to a string)
    Set {
        key: String,
        value: String,
    },
}
