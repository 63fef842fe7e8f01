//! Cached power state with optimistic updates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::daemon::DaemonClient;
use crate::domain::PowerState;
use crate::error::{RemoteError, Result};

/// Per-device power state as last observed (or optimistically assumed).
pub struct PowerTracker {
    client: Arc<DaemonClient>,
    states: Mutex<HashMap<String, PowerState>>,
}

impl PowerTracker {
    pub fn new(client: Arc<DaemonClient>) -> Self {
        Self {
            client,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Cached state; `Pending` until the device was checked.
    pub fn state(&self, device_id: &str) -> PowerState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .copied()
            .unwrap_or_default()
    }

    fn store(&self, device_id: &str, state: PowerState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id.to_string(), state);
    }

    /// Ask the device. A failed query caches `Unavailable`.
    pub async fn refresh(&self, device_id: &str) -> PowerState {
        let state = match self.client.power_state(device_id).await {
            Ok(status) => PowerState::from_on(status.on),
            Err(e) => {
                debug!("power_state {} failed: {}", device_id, e);
                PowerState::Unavailable
            }
        };
        self.store(device_id, state);
        state
    }

    /// Flip the power state: off when known to be on, otherwise on.
    pub async fn toggle(&self, device_id: &str) -> Result<PowerState> {
        let target = self.state(device_id).toggled();
        self.set(device_id, target == PowerState::On).await
    }

    /// Turn the device on or off.
    ///
    /// The cache changes before the command is sent and goes back to the
    /// previous value if the command fails.
    pub async fn set(&self, device_id: &str, on: bool) -> Result<PowerState> {
        if device_id.is_empty() {
            return Err(RemoteError::NoDeviceSelected);
        }

        let previous = self.state(device_id);
        let target = PowerState::from_on(on);
        self.store(device_id, target);

        match self.client.set_power(device_id, on).await {
            Ok(()) => Ok(target),
            Err(e) => {
                debug!("power {} for {} failed, reverting to {:?}", target.label(), device_id, previous);
                self.store(device_id, previous);
                Err(e)
            }
        }
    }
}
