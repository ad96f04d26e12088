use chrono::Utc;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::bridge::{naming, BridgeSupervisor};
use crate::camera::CameraRegistry;

/// Periodically copies the bridge's per-camera connectivity into the registry.
pub struct StatusRefresher {
    bridge: Arc<BridgeSupervisor>,
    registry: Arc<CameraRegistry>,
    period: Duration,
}

impl StatusRefresher {
    pub fn new(
        bridge: Arc<BridgeSupervisor>,
        registry: Arc<CameraRegistry>,
        period: Duration,
    ) -> Self {
        Self {
            bridge,
            registry,
            period,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick fires immediately; the bridge is still starting then
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let updated = tokio::select! {
                _ = cancel.cancelled() => break,
                updated = self.refresh_once() => updated,
            };
            if let Some(updated) = updated {
                tracing::debug!("Refreshed status of {} cameras", updated);
            }
        }

        tracing::debug!("Camera status refresher stopped");
    }

    /// One pass. `None` when the bridge gave no trustworthy answer.
    pub async fn refresh_once(&self) -> Option<usize> {
        let connected = self.bridge.connected_devices().await?;
        let seen_at = Utc::now();

        let mut updated = 0;
        for camera in self.registry.list().await {
            let online = connected.contains(&naming::normalize(&camera.name));
            if online != camera.online {
                tracing::info!(
                    camera = %camera.name,
                    online,
                    "Camera connectivity changed"
                );
            }
            if self.registry.set_online(&camera.id, online, seen_at).await {
                updated += 1;
            }
        }
        Some(updated)
    }
}
