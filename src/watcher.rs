//! Device Watcher: detects hot-plug changes in the host's device list and
//! marshals them onto the control domain as [`EngineEvent`]s (spec §3
//! "Device Watcher", §4.4 "Device Watcher").
//!
//! The host audio API exposed here has no native push-notification hook
//! (neither does the teacher's `cpal`-free ALSA path in `hw/alsa.rs`, which
//! also polls), so the watcher polls `list_devices()` on an interval and
//! diffs snapshots by UID, the same way `poodle64-thoth`'s device list
//! refresh compares against the previously seen set.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::info;

use crate::device::HostAudioApi;
use crate::message::EngineEvent;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct DeviceWatcher {
    host: Arc<dyn HostAudioApi>,
    known: HashSet<String>,
    poll_interval: Duration,
}

impl DeviceWatcher {
    pub fn new(host: Arc<dyn HostAudioApi>) -> Self {
        let known = host.list_devices().into_iter().map(|d| d.uid).collect();
        Self {
            host,
            known,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Runs until `events` is dropped, emitting one [`EngineEvent`] per
    /// device that appears or disappears between polls. Intended to run on
    /// its own task, spawned by [`crate::engine::Engine::start_watcher`].
    pub async fn run(mut self, events: mpsc::UnboundedSender<EngineEvent>) {
        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;
            let current: Vec<_> = self.host.list_devices();
            let current_uids: HashSet<String> = current.iter().map(|d| d.uid.clone()).collect();

            for device in &current {
                if !self.known.contains(&device.uid) {
                    info!(uid = %device.uid, name = %device.name, "device connected");
                    if events
                        .send(EngineEvent::DeviceConnected(device.clone()))
                        .is_err()
                    {
                        return;
                    }
                }
            }
            for uid in self.known.difference(&current_uids) {
                info!(uid = %uid, "device disconnected");
                if events
                    .send(EngineEvent::DeviceDisconnected { uid: uid.clone() })
                    .is_err()
                {
                    return;
                }
            }
            self.known = current_uids;
        }
    }
}
