//! Now-playing poll loop
//!
//! One timer per poller. Selecting a device stops the previous timer,
//! fetches once right away and then refreshes on a fixed interval. Each
//! refresh publishes a fresh `Snapshot` on a watch channel.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::PollConfig;
use crate::daemon::DaemonClient;
use crate::domain::{NowPlaying, PowerState};
use crate::error::{RemoteError, Result};
use crate::poll::power::PowerTracker;

/// Shortest period the timer accepts.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// What the poll loop last saw for the selected device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub device: Option<String>,
    /// `None` until fetched, and again after a failed fetch
    pub metadata: Option<NowPlaying>,
    pub power: PowerState,
    pub artwork_path: Option<String>,
    pub last_error: Option<String>,
    /// Completed refreshes for this device
    pub refreshes: u64,
}

struct PollContext {
    client: Arc<DaemonClient>,
    power: Arc<PowerTracker>,
    state: watch::Sender<Snapshot>,
}

impl PollContext {
    async fn refresh(&self, device_id: &str) {
        let fetched = self.client.now_playing(device_id).await;
        let power = self.power.refresh(device_id).await;

        let (previous_title, previous_artwork) = {
            let current = self.state.borrow();
            (
                current.metadata.as_ref().map(|m| m.title.clone()),
                current.artwork_path.clone(),
            )
        };

        let (metadata, error) = match fetched {
            Ok(metadata) => (Some(metadata), None),
            Err(e) => {
                debug!("get_metadata {} failed: {}", device_id, e);
                (None, Some(e.to_string()))
            }
        };

        let artwork_path = match &metadata {
            Some(m) if m.has_content() && previous_title.as_deref() == Some(m.title.as_str()) => previous_artwork,
            Some(m) if m.has_content() => match self.client.artwork(device_id).await {
                Ok(artwork) => artwork.artwork_path,
                Err(e) => {
                    debug!("get_artwork {} failed: {}", device_id, e);
                    None
                }
            },
            _ => None,
        };

        self.state.send_if_modified(|snapshot| {
            if snapshot.device.as_deref() != Some(device_id) {
                return false;
            }
            snapshot.metadata = metadata;
            snapshot.power = power;
            snapshot.artwork_path = artwork_path;
            snapshot.last_error = error;
            snapshot.refreshes += 1;
            true
        });
    }
}

/// Periodic metadata and power refresh for the selected device.
pub struct Poller {
    ctx: Arc<PollContext>,
    interval: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
    selecting: tokio::sync::Mutex<()>,
}

impl Poller {
    /// A zero `interval` is raised to one millisecond.
    pub fn new(client: Arc<DaemonClient>, interval: Duration) -> Self {
        let power = Arc::new(PowerTracker::new(Arc::clone(&client)));
        let (state, _) = watch::channel(Snapshot::default());
        Self {
            ctx: Arc::new(PollContext { client, power, state }),
            interval: interval.max(MIN_INTERVAL),
            timer: Mutex::new(None),
            selecting: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(client: Arc<DaemonClient>, config: &PollConfig) -> Self {
        Self::new(client, config.interval())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.ctx.state.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.ctx.state.borrow().clone()
    }

    pub fn power(&self) -> &PowerTracker {
        &self.ctx.power
    }

    /// Whether a timer is running.
    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Switch polling to `device_id`: stop the old timer, fetch once now,
    /// then keep refreshing every interval.
    ///
    /// Overlapping calls run one after another, so the last call's device
    /// owns the timer.
    pub async fn select_device(&self, device_id: &str) -> Result<()> {
        if device_id.is_empty() {
            return Err(RemoteError::NoDeviceSelected);
        }
        let _selecting = self.selecting.lock().await;

        self.stop();
        self.ctx.state.send_replace(Snapshot {
            device: Some(device_id.to_string()),
            power: self.ctx.power.state(device_id),
            ..Snapshot::default()
        });

        self.ctx.refresh(device_id).await;

        let ctx = Arc::clone(&self.ctx);
        let device = device_id.to_string();
        let period = self.interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                ctx.refresh(&device).await;
            }
        });

        let replaced = self.timer.lock().unwrap_or_else(PoisonError::into_inner).replace(task);
        if let Some(old) = replaced {
            old.abort();
        }

        info!("Polling {} every {:?}", device_id, self.interval);
        Ok(())
    }

    /// Refresh the selected device right away.
    pub async fn refresh_now(&self) -> Result<Snapshot> {
        let device = self.snapshot().device.ok_or(RemoteError::NoDeviceSelected)?;
        self.ctx.refresh(&device).await;
        Ok(self.snapshot())
    }

    /// Toggle power on the selected device and publish the new state.
    pub async fn toggle_power(&self) -> Result<PowerState> {
        let device = self.snapshot().device.ok_or(RemoteError::NoDeviceSelected)?;
        let result = self.ctx.power.toggle(&device).await;
        let power = self.ctx.power.state(&device);
        self.ctx.state.send_if_modified(|snapshot| {
            if snapshot.device.as_deref() != Some(device.as_str()) || snapshot.power == power {
                return false;
            }
            snapshot.power = power;
            true
        });
        result
    }

    /// Stop the timer, if any.
    pub fn stop(&self) {
        let task = self.timer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::mock::MockLauncher;
    use crate::ipc::messages::Reply;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn poller(handler: impl Fn(&str) -> Reply + Send + Sync + 'static, interval_ms: u64) -> (Arc<MockLauncher>, Poller) {
        let launcher = Arc::new(MockLauncher::serving(move |request| Some(handler(request.cmd.as_str()))));
        let client = Arc::new(DaemonClient::new(launcher.clone()));
        (launcher, Poller::new(client, Duration::from_millis(interval_ms)))
    }

    fn playing(cmd: &str) -> Reply {
        match cmd {
            "get_metadata" => Reply::Result(json!({"title": "Andor", "device_state": "playing"})),
            "get_artwork" => Reply::Result(json!({"artwork_path": "/tmp/atv_artwork.jpg", "mimetype": "image/jpeg"})),
            "power_state" => Reply::Result(json!({"on": true})),
            _ => Reply::Result(json!({})),
        }
    }

    #[tokio::test]
    async fn test_select_device_fetches_immediately() {
        let (launcher, poller) = poller(playing, 60_000);
        poller.select_device("d1").await.unwrap();

        let snapshot = poller.snapshot();
        assert_eq!(snapshot.device.as_deref(), Some("d1"));
        assert_eq!(snapshot.refreshes, 1);
        assert_eq!(snapshot.metadata.unwrap().title, "Andor");
        assert_eq!(snapshot.power, PowerState::On);
        assert_eq!(snapshot.artwork_path.as_deref(), Some("/tmp/atv_artwork.jpg"));
        assert_eq!(launcher.commands(), vec!["get_metadata", "power_state", "get_artwork"]);
        assert!(poller.is_running());
    }

    #[tokio::test]
    async fn test_select_without_device() {
        let (_launcher, poller) = poller(playing, 60_000);
        assert!(matches!(poller.select_device("").await, Err(RemoteError::NoDeviceSelected)));
        assert!(!poller.is_running());
    }

    #[tokio::test]
    async fn test_timer_keeps_refreshing() {
        let (_launcher, poller) = poller(playing, 20);
        let mut updates = poller.subscribe();
        poller.select_device("d1").await.unwrap();

        while updates.borrow_and_update().refreshes < 3 {
            updates.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_artwork_only_refetched_on_title_change() {
        let (launcher, poller) = poller(playing, 60_000);
        poller.select_device("d1").await.unwrap();
        poller.refresh_now().await.unwrap();
        poller.refresh_now().await.unwrap();

        let artwork_calls = launcher.commands().iter().filter(|c| *c == "get_artwork").count();
        assert_eq!(artwork_calls, 1);
        assert_eq!(poller.snapshot().artwork_path.as_deref(), Some("/tmp/atv_artwork.jpg"));
    }

    #[tokio::test]
    async fn test_failed_fetch_clears_metadata_and_keeps_ticking() {
        let broken = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&broken);
        let (_launcher, poller) = poller(
            move |cmd| {
                if cmd == "get_metadata" && flag.load(Ordering::SeqCst) {
                    Reply::Error("Connection lost".into())
                } else {
                    playing(cmd)
                }
            },
            20,
        );
        let mut updates = poller.subscribe();
        poller.select_device("d1").await.unwrap();
        assert!(poller.snapshot().metadata.is_some());

        broken.store(true, Ordering::SeqCst);
        let failed_at = loop {
            updates.changed().await.unwrap();
            let snapshot = updates.borrow_and_update().clone();
            if snapshot.metadata.is_none() {
                assert_eq!(snapshot.last_error.as_deref(), Some("Daemon error: Connection lost"));
                assert!(snapshot.artwork_path.is_none());
                break snapshot.refreshes;
            }
        };

        // Still ticking after the failure
        while updates.borrow_and_update().refreshes <= failed_at {
            updates.changed().await.unwrap();
        }
        assert!(poller.is_running());
    }

    #[tokio::test]
    async fn test_switching_device_resets_snapshot() {
        let (_launcher, poller) = poller(playing, 60_000);
        poller.select_device("d1").await.unwrap();
        poller.select_device("d2").await.unwrap();

        let snapshot = poller.snapshot();
        assert_eq!(snapshot.device.as_deref(), Some("d2"));
        assert_eq!(snapshot.refreshes, 1);
    }

    #[tokio::test]
    async fn test_zero_interval_still_ticks() {
        let (_launcher, poller) = poller(playing, 0);
        assert_eq!(poller.interval(), Duration::from_millis(1));

        let mut updates = poller.subscribe();
        poller.select_device("d1").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while updates.borrow_and_update().refreshes < 3 {
                updates.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert!(poller.is_running());
    }

    fn metadata_polls(launcher: &MockLauncher, device: &str) -> usize {
        launcher
            .requests()
            .iter()
            .filter(|r| r.cmd == "get_metadata" && r.args.first() == Some(&json!(device)))
            .count()
    }

    #[tokio::test]
    async fn test_overlapping_selection_polls_latest_device() {
        let launcher = Arc::new(MockLauncher::new());
        let client = Arc::new(DaemonClient::new(launcher.clone()));
        let poller = Arc::new(Poller::new(client, Duration::from_millis(20)));

        let first = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.select_device("d1").await })
        };

        // d1 answers slowly, so the second selection starts mid-fetch
        let mut daemon = launcher.next_daemon().await.unwrap();
        tokio::spawn(async move {
            while let Some(request) = daemon.recv().await {
                if request.args.first() == Some(&json!("d1")) {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                let result = match playing(&request.cmd) {
                    Reply::Result(value) => value,
                    Reply::Error(_) => json!({}),
                };
                if daemon.reply_ok(&request.id, result).await.is_err() {
                    break;
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        poller.select_device("d2").await.unwrap();
        first.await.unwrap().unwrap();

        let d1_polls = metadata_polls(&launcher, "d1");
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(poller.snapshot().device.as_deref(), Some("d2"));
        assert_eq!(metadata_polls(&launcher, "d1"), d1_polls);
        assert!(metadata_polls(&launcher, "d2") > 1);
        poller.stop();
    }

    #[tokio::test]
    async fn test_stop() {
        let (_launcher, poller) = poller(playing, 60_000);
        poller.select_device("d1").await.unwrap();
        poller.stop();
        assert!(!poller.is_running());
    }

    #[tokio::test]
    async fn test_toggle_power_publishes_state() {
        let (launcher, poller) = poller(playing, 60_000);
        poller.select_device("d1").await.unwrap();

        assert_eq!(poller.toggle_power().await.unwrap(), PowerState::Off);
        assert_eq!(poller.snapshot().power, PowerState::Off);
        assert_eq!(launcher.commands().last().map(String::as_str), Some("power_off"));
    }
}
