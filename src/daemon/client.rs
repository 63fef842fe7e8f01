//! Request multiplexer
//!
//! `DaemonClient::send` is the one entry point every caller goes through.
//! It allocates an id, registers the request, writes the line while the
//! supervisor lock is held (so writes reach the daemon in call order) and
//! then waits for the reader task to route the reply back.

use std::sync::Arc;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::config::DaemonConfig;
use crate::daemon::launcher::{DaemonLauncher, ProcessLauncher};
use crate::daemon::supervisor::DaemonSupervisor;
use crate::domain::{AppList, Artwork, ConfigValue, DeviceList, NowPlaying, PowerStatus, Volume};
use crate::error::{RemoteError, Result};
use crate::ipc::messages::{Command, RemoteKey, RequestEnvelope};
use crate::pairing::{Credentials, Protocol};

/// Client for the control daemon.
pub struct DaemonClient {
    supervisor: DaemonSupervisor,
}

impl DaemonClient {
    /// Create a client that starts daemons with the given launcher.
    pub fn new(launcher: Arc<dyn DaemonLauncher>) -> Self {
        Self {
            supervisor: DaemonSupervisor::new(launcher),
        }
    }

    /// Create a client for the configured daemon executable.
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(Arc::new(ProcessLauncher::from_config(config)))
    }

    pub fn supervisor(&self) -> &DaemonSupervisor {
        &self.supervisor
    }

    /// Send a command and wait for its result.
    ///
    /// `null` arguments are dropped. Daemon-reported errors come back as
    /// `RemoteError::Rpc`; if the daemon goes away first the call fails with
    /// `RemoteError::DaemonExited`.
    pub async fn send(&self, command: impl AsRef<str>, args: Vec<Value>) -> Result<Value> {
        let command = command.as_ref();

        let completion = {
            let mut handle = self.supervisor.acquire().await?;
            let id = handle.next_request_id();
            let completion = handle.pending().register(&id)?;

            debug!("-> daemon #{} [{}] {}", handle.generation(), id, command);
            if let Err(e) = handle.write(RequestEnvelope::new(id.as_str(), command, args)) {
                handle.pending().discard(&id);
                warn!("Failed to write request {} ({}): {}", id, command, e);
                return Err(e);
            }
            completion
        };

        completion.await.unwrap_or(Err(RemoteError::DaemonExited))
    }

    /// Send a command and deserialize its result.
    pub async fn call<T: DeserializeOwned>(&self, command: Command, args: Vec<Value>) -> Result<T> {
        if command.is_device_scoped() && args.first().and_then(Value::as_str).is_none_or(str::is_empty) {
            return Err(RemoteError::NoDeviceSelected);
        }
        let value = self.send(command, args).await?;
        serde_json::from_value(value).map_err(|e| RemoteError::InvalidResponse(format!("{}: {}", command, e)))
    }

    /// Stop the daemon, failing anything still pending.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    // =========================================================================
    // Convenience methods
    // =========================================================================

    /// Configured devices and the saved selection.
    pub async fn list_devices(&self) -> Result<DeviceList> {
        self.call(Command::ListDevices, vec![]).await
    }

    /// Discover devices on the network.
    pub async fn scan_devices(&self) -> Result<DeviceList> {
        self.call(Command::ScanDevices, vec![]).await
    }

    pub async fn select_device(&self, device_id: &str) -> Result<Value> {
        self.call(Command::SelectDevice, vec![json!(device_id)]).await
    }

    pub async fn remove_device(&self, device_id: &str) -> Result<Value> {
        self.call(Command::RemoveDevice, vec![json!(device_id)]).await
    }

    /// Start pairing one protocol.
    pub async fn pair_begin(&self, device_id: &str, address: &str, protocol: Protocol) -> Result<Value> {
        self.call(
            Command::PairBegin,
            vec![json!(device_id), json!(address), json!(protocol.as_str())],
        )
        .await
    }

    /// Submit the PIN for the pairing in progress.
    pub async fn pair_pin(&self, device_id: &str, pin: &str) -> Result<Value> {
        self.call(Command::PairPin, vec![json!(device_id), json!(pin)]).await
    }

    /// Persist a device with its collected credentials.
    pub async fn pair_save(&self, device_id: &str, address: &str, name: &str, credentials: &Credentials) -> Result<Value> {
        self.call(
            Command::PairSave,
            vec![json!(device_id), json!(address), json!(name), serde_json::to_value(credentials)?],
        )
        .await
    }

    pub async fn power_state(&self, device_id: &str) -> Result<PowerStatus> {
        self.call(Command::PowerState, vec![json!(device_id)]).await
    }

    /// Send `power_on` or `power_off`.
    pub async fn set_power(&self, device_id: &str, on: bool) -> Result<()> {
        let command = if on { Command::PowerOn } else { Command::PowerOff };
        self.call::<Value>(command, vec![json!(device_id)]).await.map(|_| ())
    }

    pub async fn now_playing(&self, device_id: &str) -> Result<NowPlaying> {
        self.call(Command::GetMetadata, vec![json!(device_id)]).await
    }

    pub async fn artwork(&self, device_id: &str) -> Result<Artwork> {
        self.call(Command::GetArtwork, vec![json!(device_id)]).await
    }

    pub async fn list_apps(&self, device_id: &str) -> Result<AppList> {
        self.call(Command::ListApps, vec![json!(device_id)]).await
    }

    pub async fn launch_app(&self, device_id: &str, bundle_id: &str) -> Result<()> {
        self.call::<Value>(Command::LaunchApp, vec![json!(device_id), json!(bundle_id)])
            .await
            .map(|_| ())
    }

    /// Replace the text of the focused on-screen text field.
    pub async fn keyboard_set(&self, device_id: &str, text: &str) -> Result<()> {
        self.call::<Value>(Command::KeyboardSet, vec![json!(device_id), json!(text)])
            .await
            .map(|_| ())
    }

    /// Send a remote-control directive.
    pub async fn press(&self, device_id: &str, key: RemoteKey) -> Result<()> {
        self.call::<Value>(Command::Remote(key), vec![json!(device_id)]).await.map(|_| ())
    }

    pub async fn volume(&self, device_id: &str) -> Result<Volume> {
        self.call(Command::GetVolume, vec![json!(device_id)]).await
    }

    /// Set the volume, clamped to 0..=100.
    pub async fn set_volume(&self, device_id: &str, level: f64) -> Result<Volume> {
        let level = level.clamp(0.0, 100.0);
        self.call(Command::SetVolume, vec![json!(device_id), json!(level)]).await
    }

    pub async fn mute(&self, device_id: &str) -> Result<Volume> {
        self.call(Command::VolumeMute, vec![json!(device_id)]).await
    }

    pub async fn config_value(&self, device_id: &str, key: &str) -> Result<ConfigValue> {
        self.call(Command::GetConfigValue, vec![json!(device_id), json!(key)]).await
    }

    /// Store a per-device config value. The daemon expects it JSON-encoded.
    pub async fn set_config_value(&self, device_id: &str, key: &str, value: &Value) -> Result<()> {
        self.call::<Value>(
            Command::SetConfigValue,
            vec![json!(device_id), json!(key), json!(value.to_string())],
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::mock::MockLauncher;
    use crate::ipc::messages::Reply;

    fn echo_client() -> (Arc<MockLauncher>, DaemonClient) {
        let launcher = Arc::new(MockLauncher::serving(|request| {
            Some(Reply::Result(json!({"cmd": request.cmd, "args": request.args})))
        }));
        let client = DaemonClient::new(launcher.clone());
        (launcher, client)
    }

    #[tokio::test]
    async fn test_send_returns_result_verbatim() {
        let (_launcher, client) = echo_client();
        let result = client.send("list_devices", vec![]).await.unwrap();
        assert_eq!(result, json!({"cmd": "list_devices", "args": []}));
    }

    #[tokio::test]
    async fn test_send_drops_null_args() {
        let (launcher, client) = echo_client();
        client.send("power_on", vec![json!("d1"), Value::Null]).await.unwrap();
        let seen = launcher.requests();
        assert_eq!(seen[0].args, vec![json!("d1")]);
    }

    #[tokio::test]
    async fn test_rpc_error_reaches_caller() {
        let launcher = Arc::new(MockLauncher::serving(|request| {
            Some(Reply::Error(format!("Unknown command: '{}'", request.cmd)))
        }));
        let client = DaemonClient::new(launcher);
        let err = client.send("jump", vec![]).await.unwrap_err();
        assert!(matches!(err, RemoteError::Rpc(ref m) if m == "Unknown command: 'jump'"));
    }

    #[tokio::test]
    async fn test_typed_call_shape_mismatch() {
        let launcher = Arc::new(MockLauncher::serving(|_| Some(Reply::Result(json!({"devices": "nope"})))));
        let client = DaemonClient::new(launcher);
        let err = client.list_devices().await.unwrap_err();
        assert!(matches!(err, RemoteError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_device_scoped_call_without_device() {
        let (launcher, client) = echo_client();
        let err = client.power_state("").await.unwrap_err();
        assert!(matches!(err, RemoteError::NoDeviceSelected));
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_set_volume_is_clamped() {
        let launcher = Arc::new(MockLauncher::serving(|request| {
            Some(Reply::Result(json!({"volume": request.args[1]})))
        }));
        let client = DaemonClient::new(launcher);
        assert_eq!(client.set_volume("d1", 140.0).await.unwrap().volume, Some(100.0));
        assert_eq!(client.set_volume("d1", -3.0).await.unwrap().volume, Some(0.0));
    }

    #[tokio::test]
    async fn test_set_config_value_encodes_json() {
        let (launcher, client) = echo_client();
        client
            .set_config_value("d1", "favorites", &json!(["com.netflix.Netflix"]))
            .await
            .unwrap();
        let seen = launcher.requests();
        assert_eq!(seen[0].args[2], json!(r#"["com.netflix.Netflix"]"#));
    }

    #[tokio::test]
    async fn test_pair_save_sends_credentials_object() {
        let (launcher, client) = echo_client();
        let mut credentials = Credentials::new();
        credentials.insert(Protocol::Mrp, "mrp-creds".to_string());
        client.pair_save("d1", "10.0.0.2", "Den", &credentials).await.unwrap();

        let seen = launcher.requests();
        assert_eq!(seen[0].cmd, "pair_save");
        assert_eq!(
            seen[0].args,
            vec![json!("d1"), json!("10.0.0.2"), json!("Den"), json!({"mrp": "mrp-creds"})]
        );
    }

    #[tokio::test]
    async fn test_press_uses_directive_name() {
        let (launcher, client) = echo_client();
        client.press("d1", RemoteKey::TopMenu).await.unwrap();
        assert_eq!(launcher.requests()[0].cmd, "top_menu");
    }
}
