use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use atv_remote::config::Config;
use atv_remote::daemon::DaemonClient;
use atv_remote::domain::{NowPlaying, PowerState};
use atv_remote::error::RemoteError;
use atv_remote::pairing::{AttemptResult, LinePinPrompt, PairingOrchestrator};
use atv_remote::poll::{Poller, PowerTracker, Snapshot};

mod cli;

use cli::Cli;
use cli::commands::{Commands, PowerAction, PrefCommands};

/// Filter directives from the config file; `RUST_LOG` wins when set.
fn config_log_filters<'a>(log_level: Option<&'a str>, rust_log: Option<&str>) -> Option<&'a str> {
    if rust_log.is_some_and(|env| !env.trim().is_empty()) {
        return None;
    }
    log_level.map(str::trim).filter(|level| !level.is_empty())
}

fn setup_logging(log_level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("atv-remote")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("atv-remote.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::from_default_env();
    let rust_log = std::env::var("RUST_LOG").ok();
    if let Some(filters) = config_log_filters(log_level, rust_log.as_deref()) {
        builder.parse_filters(filters);
    }
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{} {}", "Daemon:".yellow(), config.daemon.path.display());
    }

    let client = Arc::new(DaemonClient::from_config(&config.daemon));
    let result = dispatch(cli, config, &client).await;
    client.shutdown().await;
    result
}

async fn dispatch(cli: &Cli, config: &Config, client: &Arc<DaemonClient>) -> Result<()> {
    match &cli.command {
        Commands::Devices => handle_devices_command(client, false).await,
        Commands::Scan => handle_devices_command(client, true).await,
        Commands::Select { id } => {
            client.select_device(id).await?;
            println!("{} {}", "Selected:".green(), id);
            Ok(())
        }
        Commands::Remove { id } => {
            client.remove_device(id).await?;
            println!("{} {}", "Removed:".red(), id);
            Ok(())
        }
        Commands::Setup { id, address, name } => {
            handle_setup_command(client, config, id, address, name.as_deref().unwrap_or(id)).await
        }
        Commands::Power { action } => {
            let device = resolve_device(cli, client).await?;
            handle_power_command(client, &device, *action).await
        }
        Commands::Key { key } => {
            let device = resolve_device(cli, client).await?;
            client.press(&device, *key).await?;
            Ok(())
        }
        Commands::Apps => {
            let device = resolve_device(cli, client).await?;
            for app in client.list_apps(&device).await?.apps {
                println!("{:<40} {}", app.name, app.id.dimmed());
            }
            Ok(())
        }
        Commands::Launch { bundle_id } => {
            let device = resolve_device(cli, client).await?;
            client.launch_app(&device, bundle_id).await?;
            println!("{} {}", "Launched:".green(), bundle_id);
            Ok(())
        }
        Commands::Type { text } => {
            let device = resolve_device(cli, client).await?;
            client.keyboard_set(&device, text).await?;
            Ok(())
        }
        Commands::NowPlaying => {
            let device = resolve_device(cli, client).await?;
            print_now_playing(&client.now_playing(&device).await?);
            Ok(())
        }
        Commands::Watch { interval_ms } => {
            let device = resolve_device(cli, client).await?;
            let interval = interval_ms.map(Duration::from_millis).unwrap_or_else(|| config.poll.interval());
            handle_watch_command(client, &device, interval).await
        }
        Commands::Volume { level, mute } => {
            let device = resolve_device(cli, client).await?;
            let volume = match (level, mute) {
                (_, true) => client.mute(&device).await?,
                (Some(level), false) => client.set_volume(&device, *level).await?,
                (None, false) => client.volume(&device).await?,
            };
            match volume.volume {
                Some(v) => println!("{} {:.0}", "Volume:".cyan(), v),
                None => println!("{} {}", "Volume:".cyan(), "unavailable".dimmed()),
            }
            Ok(())
        }
        Commands::Pref { command } => {
            let device = resolve_device(cli, client).await?;
            match command {
                PrefCommands::Get { key } => {
                    println!("{}", client.config_value(&device, key).await?.value);
                }
                PrefCommands::Set { key, value } => {
                    let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.clone()));
                    client.set_config_value(&device, key, &value).await?;
                }
            }
            Ok(())
        }
    }
}

/// The `--device` flag, else the saved selection, else the first device.
async fn resolve_device(cli: &Cli, client: &DaemonClient) -> Result<String> {
    if let Some(device) = &cli.device {
        return Ok(device.clone());
    }
    let devices = client.list_devices().await.context("Failed to list devices")?;
    devices
        .effective_selection()
        .map(str::to_string)
        .ok_or_else(|| RemoteError::NoDeviceSelected.into())
}

async fn handle_devices_command(client: &DaemonClient, scan: bool) -> Result<()> {
    if scan {
        println!("{}", "Scanning...".cyan());
    }
    let list = if scan {
        client.scan_devices().await?
    } else {
        client.list_devices().await?
    };

    if list.devices.is_empty() {
        println!("{}", "No devices found".yellow());
        return Ok(());
    }

    for device in &list.devices {
        let marker = if list.selected.as_deref() == Some(device.id.as_str()) { "*" } else { " " };
        let status = if device.needs_setup() { " (not set up)".yellow().to_string() } else { String::new() };
        println!(
            "{} {:<24} {:<16} {}{}",
            marker.green(),
            device.display_name(),
            device.address,
            device.id.dimmed(),
            status
        );
    }
    Ok(())
}

async fn handle_setup_command(
    client: &Arc<DaemonClient>,
    config: &Config,
    id: &str,
    address: &str,
    name: &str,
) -> Result<()> {
    info!("Setting up device: {} ({})", id, address);
    println!("{} {} at {}", "Setting up:".green(), name, address);

    let prompt = Arc::new(LinePinPrompt::new(
        tokio::io::BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    ));
    let orchestrator = PairingOrchestrator::for_client(Arc::clone(client), prompt, &config.pairing);

    match orchestrator.setup_device(id, address, name).await {
        Ok(report) => {
            for (protocol, result) in &report.results {
                println!("  {:<10} {}", protocol.label(), describe_attempt(result));
            }
            println!("{}", report.summary().green());
            Ok(())
        }
        Err(e) => {
            println!("{}", e.to_string().red());
            Err(e.into())
        }
    }
}

fn describe_attempt(result: &AttemptResult) -> ColoredString {
    match result {
        AttemptResult::Succeeded => "paired".green(),
        AttemptResult::Cancelled => "skipped".yellow(),
        AttemptResult::Failed(reason) => format!("failed: {}", reason).red(),
    }
}

async fn handle_power_command(client: &Arc<DaemonClient>, device: &str, action: PowerAction) -> Result<()> {
    let tracker = PowerTracker::new(Arc::clone(client));
    tracker.refresh(device).await;

    let state = match action {
        PowerAction::Status => tracker.state(device),
        PowerAction::On => tracker.set(device, true).await?,
        PowerAction::Off => tracker.set(device, false).await?,
        PowerAction::Toggle => tracker.toggle(device).await?,
    };
    println!("{} {}", "Power:".cyan(), color_power(state));
    Ok(())
}

fn color_power(state: PowerState) -> ColoredString {
    match state {
        PowerState::On => state.label().green(),
        PowerState::Off => state.label().normal(),
        PowerState::Pending => state.label().dimmed(),
        PowerState::Unavailable => state.label().red(),
    }
}

fn print_now_playing(meta: &NowPlaying) {
    if !meta.has_content() {
        println!("{}", "Nothing playing".dimmed());
        return;
    }
    println!("{}", meta.title.bold());
    let subtitle = [meta.artist.as_str(), meta.album.as_str(), meta.series.as_str()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" - ");
    if !subtitle.is_empty() {
        println!("{}", subtitle);
    }
    if let Some(progress) = meta.progress_label() {
        println!("{} {}", progress.dimmed(), meta.device_state.dimmed());
    }
}

fn print_snapshot(snapshot: &Snapshot) {
    println!("{} {}", "Power:".cyan(), color_power(snapshot.power));
    match &snapshot.metadata {
        Some(meta) => print_now_playing(meta),
        None => println!("{}", "No metadata".dimmed()),
    }
    if let Some(path) = &snapshot.artwork_path {
        println!("{} {}", "Artwork:".cyan(), path);
    }
}

async fn handle_watch_command(client: &Arc<DaemonClient>, device: &str, interval: Duration) -> Result<()> {
    let poller = Poller::new(Arc::clone(client), interval);
    let mut updates = poller.subscribe();
    poller.select_device(device).await?;
    print_snapshot(&updates.borrow_and_update());

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                println!();
                print_snapshot(&updates.borrow_and_update());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping watch");
                break;
            }
        }
    }

    poller.stop();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging with the configured level
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_log_level_applies_without_rust_log() {
        assert_eq!(config_log_filters(Some("debug"), None), Some("debug"));
        assert_eq!(config_log_filters(Some(" atv_remote=trace "), Some("")), Some("atv_remote=trace"));
    }

    #[test]
    fn test_rust_log_overrides_config() {
        assert_eq!(config_log_filters(Some("debug"), Some("warn")), None);
    }

    #[test]
    fn test_no_config_level() {
        assert_eq!(config_log_filters(None, None), None);
        assert_eq!(config_log_filters(Some("  "), None), None);
    }
}
