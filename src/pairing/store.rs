//! Where collected credentials go after a successful pairing.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;

use crate::daemon::DaemonClient;
use crate::error::Result;
use crate::pairing::machine::Protocol;

/// Opaque credential blobs keyed by the protocol that produced them.
pub type Credentials = BTreeMap<Protocol, String>;

/// Persists a paired device.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save(&self, device_id: &str, address: &str, name: &str, credentials: &Credentials) -> Result<()>;
}

/// Saves through the daemon's `pair_save` command.
pub struct DaemonCredentialStore {
    client: Arc<DaemonClient>,
}

impl DaemonCredentialStore {
    pub fn new(client: Arc<DaemonClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialStore for DaemonCredentialStore {
    async fn save(&self, device_id: &str, address: &str, name: &str, credentials: &Credentials) -> Result<()> {
        let result = self.client.pair_save(device_id, address, name, credentials).await?;
        info!(
            "Saved {} with {:?} ({})",
            device_id,
            credentials.keys().map(Protocol::as_str).collect::<Vec<_>>(),
            result
        );
        Ok(())
    }
}
