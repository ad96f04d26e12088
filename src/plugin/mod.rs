//! Plugin lifecycle controller
//!
//! Owns one session per `initialize`: the cloud client, the bridge supervisor,
//! the lifetime cancellation token and the background tasks tied to it. The
//! camera registry outlives sessions and is emptied on `shutdown`.
//!
//! The bridge is started from a background task so that `health` and the
//! camera methods keep answering while the bridge performs its readiness wait.

pub mod refresher;

use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::{BridgeRuntime, BridgeState, BridgeSupervisor, SupervisorSettings};
use crate::camera::{self, CameraRecord, CameraRegistry};
use crate::cloud::{CloudApi, Credentials, WyzeCloud};
use crate::config::{PluginConfig, RuntimeSettings};
use crate::error::{CloudError, PluginError, RegistryError, Result};
use crate::protocol::{
    AddCameraParams, DiscoveredCamera, HealthDetails, HealthState, HealthStatus, PluginCamera,
    PtzCommand,
};

pub use refresher::StatusRefresher;

const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the cloud client for a session.
pub type CloudFactory =
    Box<dyn Fn(&PluginConfig) -> std::result::Result<Arc<dyn CloudApi>, CloudError> + Send + Sync>;

struct Session {
    cloud: Arc<dyn CloudApi>,
    bridge: Arc<BridgeSupervisor>,
    lifetime: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct PluginController {
    settings: RuntimeSettings,
    runtime: Arc<dyn BridgeRuntime>,
    cloud_factory: CloudFactory,
    registry: Arc<CameraRegistry>,
    session: RwLock<Option<Session>>,
}

impl PluginController {
    pub fn new(settings: RuntimeSettings, runtime: Arc<dyn BridgeRuntime>) -> Self {
        Self::with_cloud_factory(
            settings,
            runtime,
            Box::new(|config| {
                let cloud = WyzeCloud::new(Credentials::from(config))?;
                Ok(Arc::new(cloud) as Arc<dyn CloudApi>)
            }),
        )
    }

    pub fn with_cloud_factory(
        settings: RuntimeSettings,
        runtime: Arc<dyn BridgeRuntime>,
        cloud_factory: CloudFactory,
    ) -> Self {
        Self {
            settings,
            runtime,
            cloud_factory,
            registry: Arc::new(CameraRegistry::new()),
            session: RwLock::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<CameraRegistry> {
        &self.registry
    }

    pub async fn bridge(&self) -> Option<Arc<BridgeSupervisor>> {
        self.session.read().await.as_ref().map(|s| s.bridge.clone())
    }

    async fn handles(
        &self,
    ) -> Result<(Arc<dyn CloudApi>, Arc<BridgeSupervisor>, CancellationToken)> {
        let session = self.session.read().await;
        let session = session.as_ref().ok_or(RegistryError::NotInitialized)?;
        Ok((
            session.cloud.clone(),
            session.bridge.clone(),
            session.lifetime.clone(),
        ))
    }

    pub async fn initialize(&self, config: PluginConfig) -> Result<()> {
        config.validate()?;

        if self.session.read().await.is_some() {
            tracing::info!("Re-initializing, shutting down previous session");
            self.shutdown().await?;
        }

        let lifetime = CancellationToken::new();
        let cloud = (self.cloud_factory)(&config)?;
        cancellable(&lifetime, cloud.login()).await?;

        let bridge_config = config.bridge_config();
        let bridge = Arc::new(BridgeSupervisor::new(
            self.runtime.clone(),
            SupervisorSettings::for_session(&self.settings, &bridge_config),
        ));

        let start_task = {
            let bridge = bridge.clone();
            let lifetime = lifetime.clone();
            tokio::spawn(async move {
                match bridge.start(&lifetime, &bridge_config).await {
                    Ok(()) => tracing::info!("Wyze bridge started"),
                    Err(e) => {
                        tracing::warn!("Failed to start wyze bridge: {}", e);
                        tracing::warn!("Cameras will not have RTSP streams available");
                    }
                }
            })
        };

        let refresher_task = {
            let refresher = StatusRefresher::new(
                bridge.clone(),
                self.registry.clone(),
                self.settings.status_refresh_interval(),
            );
            tokio::spawn(refresher.run(lifetime.clone()))
        };

        *self.session.write().await = Some(Session {
            cloud: cloud.clone(),
            bridge,
            lifetime: lifetime.clone(),
            tasks: vec![start_task, refresher_task],
        });

        let devices = cancellable(&lifetime, cloud.list_devices()).await?;
        let mut added = 0;
        for device in devices {
            if !camera::is_camera_model(&device.product_model) {
                continue;
            }
            let Some(name) = config.admit(&device.mac, &device.nickname) else {
                continue;
            };

            tracing::info!("Added camera: {} ({})", name, device.mac);
            self.registry
                .insert(CameraRecord::from_device(&device, name))
                .await;
            added += 1;
        }

        tracing::info!("Plugin initialized with {} cameras", added);
        Ok(())
    }

    /// Safe to call any number of times.
    pub async fn shutdown(&self) -> Result<()> {
        let session = self.session.write().await.take();
        let cleared = self.registry.clear().await;

        let Some(session) = session else {
            return Ok(());
        };
        session.lifetime.cancel();
        tracing::debug!("Disconnected {} cameras", cleared);

        if let Err(e) = session.bridge.stop().await {
            tracing::warn!("Failed to stop wyze bridge: {}", e);
        }

        let mut tasks = session.tasks;
        if tokio::time::timeout(TASK_JOIN_TIMEOUT, join_all(tasks.iter_mut()))
            .await
            .is_err()
        {
            tracing::warn!("Background tasks did not finish, aborting");
            tasks.iter().for_each(JoinHandle::abort);
        }

        tracing::info!("Plugin shutdown complete");
        Ok(())
    }

    pub async fn health(&self) -> HealthStatus {
        let (online, total) = self.registry.counts().await;

        let bridge = self.bridge().await;
        let authenticated = match self.handles().await {
            Ok((cloud, _, _)) => cloud.is_authenticated().await,
            Err(_) => false,
        };
        let (bridge_running, bridge_state, bridge_error) = match &bridge {
            Some(bridge) => (
                bridge.is_running().await,
                bridge.state().await,
                bridge.last_error().await,
            ),
            None => (false, BridgeState::Stopped, None),
        };

        let state = classify(online, total, bridge_running);
        let message = match state {
            HealthState::Unknown => "No cameras configured".to_string(),
            _ if !bridge_running => match bridge_error {
                Some(error) => format!("Wyze bridge not running: {error}"),
                None => "Wyze bridge not running".to_string(),
            },
            _ => format!("{online}/{total} cameras online"),
        };

        HealthStatus {
            state,
            message: Some(message),
            last_check: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            details: HealthDetails {
                cameras_online: online,
                cameras_total: total,
                authenticated,
                bridge_running,
                bridge_state,
            },
        }
    }

    pub async fn discover_cameras(&self) -> Result<Vec<DiscoveredCamera>> {
        let (cloud, _, lifetime) = self.handles().await?;
        let devices = cancellable(&lifetime, cloud.list_devices()).await?;

        Ok(devices
            .iter()
            .filter(|d| camera::is_camera_model(&d.product_model))
            .map(camera::to_discovered)
            .collect())
    }

    pub async fn add_camera(&self, params: AddCameraParams) -> Result<PluginCamera> {
        let (cloud, bridge, lifetime) = self.handles().await?;
        let devices = cancellable(&lifetime, cloud.list_devices()).await?;

        let device = devices
            .into_iter()
            .find(|d| d.mac == params.mac)
            .ok_or_else(|| RegistryError::CameraNotFound(params.mac.clone()))?;

        if !camera::is_camera_model(&device.product_model) {
            return Err(RegistryError::Unsupported(format!(
                "{} is not a supported camera ({})",
                device.mac, device.product_model
            ))
            .into());
        }

        let name = params
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| device.nickname.clone());
        self.registry
            .insert(CameraRecord::from_device(&device, name))
            .await;
        tracing::info!("Added camera: {}", device.mac);

        if let Err(e) = self.connect_camera(&device.mac).await {
            tracing::warn!("Failed to connect camera {}: {}", device.mac, e);
        }

        let record = self.registry.get(&device.mac).await?;
        Ok(record.to_plugin_camera(&bridge))
    }

    /// Fetches the camera's P2P token and marks it online.
    pub async fn connect_camera(&self, id: &str) -> Result<()> {
        let (cloud, _, lifetime) = self.handles().await?;
        let record = self.registry.get(id).await?;
        if record.is_connected() {
            return Ok(());
        }

        let token = cancellable(&lifetime, cloud.p2p_token(id)).await?;
        let record = self.registry.mark_connected(id, token).await?;
        tracing::info!("Connected to camera: {}", record.name);
        Ok(())
    }

    pub async fn remove_camera(&self, id: &str) -> Result<()> {
        self.registry.remove(id).await?;
        tracing::info!("Removed camera: {}", id);
        Ok(())
    }

    pub async fn list_cameras(&self) -> Vec<PluginCamera> {
        let Some(bridge) = self.bridge().await else {
            return Vec::new();
        };
        self.registry
            .list()
            .await
            .iter()
            .map(|record| record.to_plugin_camera(&bridge))
            .collect()
    }

    pub async fn get_camera(&self, id: &str) -> Result<PluginCamera> {
        let record = self.registry.get(id).await?;
        let bridge = self.bridge().await.ok_or(RegistryError::NotInitialized)?;
        Ok(record.to_plugin_camera(&bridge))
    }

    pub async fn ptz_control(&self, id: &str, command: &PtzCommand) -> Result<()> {
        let record = self.registry.get(id).await?;
        let movement = camera::translate_ptz(&record.model, command)?;
        // translated and logged only; nothing is sent to the camera
        tracing::info!(speed = command.speed, "PTZ command for {}: {}", record.name, movement);
        Ok(())
    }

    pub async fn get_snapshot(&self, id: &str) -> Result<String> {
        let record = self.registry.get(id).await?;
        let bridge = self.bridge().await.ok_or(RegistryError::NotInitialized)?;
        if !bridge.is_running().await {
            return Err(RegistryError::Unsupported(
                "snapshot not available - wyze bridge not running".into(),
            )
            .into());
        }
        Ok(bridge.snapshot_url(&record.name))
    }
}

/// Health classification from camera counts and bridge liveness.
pub fn classify(online: usize, total: usize, bridge_running: bool) -> HealthState {
    if total == 0 {
        HealthState::Unknown
    } else if !bridge_running || online == 0 {
        HealthState::Unhealthy
    } else if online < total {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    }
}

async fn cancellable<T, E>(
    token: &CancellationToken,
    fut: impl Future<Output = std::result::Result<T, E>>,
) -> Result<T>
where
    PluginError: From<E>,
{
    tokio::select! {
        _ = token.cancelled() => Err(PluginError::Cancelled),
        result = fut => result.map_err(PluginError::from),
    }
}
