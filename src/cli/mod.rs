//! CLI module for atv-remote - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for device management,
//! pairing, remote control and now-playing.

pub mod commands;

pub use commands::Cli;
