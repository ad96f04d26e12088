//! Supervision of the external bridge: launch, readiness, output capture,
//! unsupervised-exit detection and graceful-then-forceful shutdown.

pub mod env;
pub mod naming;
pub mod output;
pub mod probe;
pub mod runtime;
pub mod state;

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{BridgeConfig, RuntimeKind, RuntimeSettings};
use crate::error::BridgeError;
use crate::logging::BridgeLogger;

pub use probe::{BridgeApi, BridgeCamera};
pub use runtime::{create_runtime, BridgeExit, BridgeHandle, BridgeRuntime, LaunchSpec};
pub use state::{BridgeState, BridgeStatus};
use state::StatusCell;

pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// How long after start the bridge's connectivity answers are not trusted.
pub const CONNECT_GRACE: Duration = Duration::from_secs(30);
const CONNECT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const KILL_WAIT: Duration = Duration::from_secs(2);
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub rtsp_port: u16,
    pub web_port: u16,
    /// Host data directory; `tokens/`, `img/` and `logs/` live below it.
    pub data_dir: PathBuf,
    pub startup_timeout: Duration,
    pub stop_grace: Duration,
    pub connect_grace: Duration,
    pub log_to_file: bool,
    pub mtx_config: Option<PathBuf>,
}

impl SupervisorSettings {
    pub fn new(rtsp_port: u16, web_port: u16, data_dir: PathBuf) -> Self {
        Self {
            rtsp_port,
            web_port,
            data_dir,
            startup_timeout: Duration::from_secs(60),
            stop_grace: Duration::from_secs(5),
            connect_grace: CONNECT_GRACE,
            log_to_file: true,
            mtx_config: None,
        }
    }

    /// Settings for one plugin session.
    pub fn for_session(runtime: &RuntimeSettings, config: &BridgeConfig) -> Self {
        let mtx_config = runtime.plugin_dir.join("mediamtx.yml");
        let mtx_config = (runtime.runtime == RuntimeKind::Process && mtx_config.is_file())
            .then_some(mtx_config);

        Self {
            startup_timeout: runtime.startup_timeout(),
            stop_grace: runtime.stop_grace(),
            log_to_file: runtime.bridge_log_file,
            mtx_config,
            ..Self::new(
                config.rtsp_port,
                config.web_port,
                runtime.data_dir(config.data_path.as_ref()),
            )
        }
    }
}

struct ActiveRun {
    generation: u64,
    handle: Arc<dyn BridgeHandle>,
    stop: CancellationToken,
    drain: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct BridgeSupervisor {
    runtime: Arc<dyn BridgeRuntime>,
    settings: SupervisorSettings,
    api: BridgeApi,
    status: Arc<RwLock<StatusCell>>,
    // Held during launch and teardown only.
    active: Mutex<Option<ActiveRun>>,
}

impl BridgeSupervisor {
    pub fn new(runtime: Arc<dyn BridgeRuntime>, settings: SupervisorSettings) -> Self {
        let api = BridgeApi::new(settings.web_port);
        Self {
            runtime,
            settings,
            api,
            status: Arc::new(RwLock::new(StatusCell::new())),
            active: Mutex::new(None),
        }
    }

    /// Launches the bridge and waits until its web API answers.
    ///
    /// A no-op while a run is starting or running. On any failure the run is
    /// force-cleaned, the supervisor ends `Stopped` and the error is kept as
    /// `last_error`.
    pub async fn start(
        &self,
        cancel: &CancellationToken,
        config: &BridgeConfig,
    ) -> Result<(), BridgeError> {
        let generation = {
            let mut cell = self.status.write().await;
            match cell.state {
                BridgeState::Starting | BridgeState::Running => {
                    tracing::debug!("Bridge already {:?}, start ignored", cell.state);
                    return Ok(());
                }
                BridgeState::Stopping => return Err(BridgeError::Stopping),
                BridgeState::Stopped | BridgeState::Failed => {}
            }
            cell.state = BridgeState::Starting;
            cell.generation += 1;
            cell.last_error = None;
            cell.last_exit_code = None;
            cell.generation
        };

        tracing::info!(
            runtime = ?self.runtime.kind(),
            rtsp_port = self.settings.rtsp_port,
            web_port = self.settings.web_port,
            "Starting bridge: {}",
            self.runtime.describe_command()
        );

        let stop = match self.launch(cancel, generation, config).await {
            Ok(stop) => stop,
            Err(e) => return self.fail_start(generation, e).await,
        };

        if let Err(e) = self.wait_for_ready(cancel, &stop, generation).await {
            return self.fail_start(generation, e).await;
        }

        let mut cell = self.status.write().await;
        if cell.generation != generation || cell.state != BridgeState::Starting {
            return Err(BridgeError::Stopping);
        }
        cell.state = BridgeState::Running;
        let startup = cell.started_at.map(|t| t.elapsed()).unwrap_or_default();
        tracing::info!(
            "Bridge ready after {:.1}s ({})",
            startup.as_secs_f64(),
            cell.handle.as_ref().map(|h| h.describe()).unwrap_or_default()
        );
        Ok(())
    }

    async fn launch(
        &self,
        cancel: &CancellationToken,
        generation: u64,
        config: &BridgeConfig,
    ) -> Result<CancellationToken, BridgeError> {
        let mut active = self.active.lock().await;
        if let Some(stale) = active.take() {
            tracing::debug!("Reaping previous bridge run");
            self.force_teardown(stale).await;
        }

        {
            let cell = self.status.read().await;
            if cell.generation != generation || cell.state != BridgeState::Starting {
                return Err(BridgeError::Stopping);
            }
        }

        let data_dir = &self.settings.data_dir;
        tokio::fs::create_dir_all(data_dir.join("tokens")).await?;
        tokio::fs::create_dir_all(data_dir.join("img")).await?;

        let config = BridgeConfig {
            rtsp_port: self.settings.rtsp_port,
            web_port: self.settings.web_port,
            ..config.clone()
        };
        let bridge_data_dir = self.runtime.data_dir_for(data_dir);
        let spec = LaunchSpec {
            env: env::build_environment(
                &config,
                &bridge_data_dir,
                self.settings.mtx_config.as_deref(),
            ),
            data_dir: data_dir.clone(),
            rtsp_port: self.settings.rtsp_port,
            web_port: self.settings.web_port,
        };

        let launched = self.runtime.launch(&spec).await?;
        let handle = launched.handle;
        tracing::info!("Bridge launched ({})", handle.describe());

        let sink = if self.settings.log_to_file {
            match BridgeLogger::new(data_dir.join("logs")).await {
                Ok(logger) => Some(Arc::new(logger)),
                Err(e) => {
                    tracing::warn!("Bridge log file unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let stop = cancel.child_token();
        let drain = CancellationToken::new();
        let mut tasks = output::spawn_drains(launched.outputs, drain.clone(), sink);
        tasks.push(tokio::spawn(monitor_exit(
            handle.clone(),
            self.status.clone(),
            generation,
            stop.clone(),
        )));

        {
            let mut cell = self.status.write().await;
            cell.handle = Some(handle.clone());
            cell.started_at = Some(Instant::now());
            cell.started_wall = Some(Utc::now());
            cell.stop = Some(stop.clone());
        }

        *active = Some(ActiveRun {
            generation,
            handle,
            stop: stop.clone(),
            drain,
            tasks,
        });

        Ok(stop)
    }

    async fn wait_for_ready(
        &self,
        cancel: &CancellationToken,
        stop: &CancellationToken,
        generation: u64,
    ) -> Result<(), BridgeError> {
        let timeout = self.settings.startup_timeout;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval(READY_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
                _ = stop.cancelled() => return Err(BridgeError::Stopping),
                _ = &mut deadline => return Err(BridgeError::ReadinessTimeout(timeout)),
                _ = ticker.tick() => {}
            }

            {
                let cell = self.status.read().await;
                if cell.generation != generation || cell.state != BridgeState::Starting {
                    return Err(BridgeError::Stopping);
                }
                if let Some(exit) = cell.handle.as_ref().and_then(|h| h.exit()) {
                    return Err(BridgeError::ExitedEarly(exit.code));
                }
            }

            let ready = tokio::select! {
                biased;
                _ = stop.cancelled() => continue,
                ready = self.api.probe() => ready,
            };
            if ready {
                return Ok(());
            }
        }
    }

    async fn fail_start(&self, generation: u64, error: BridgeError) -> Result<(), BridgeError> {
        {
            let mut cell = self.status.write().await;
            if cell.generation != generation || cell.state != BridgeState::Starting {
                // stop() owns the teardown
                return Err(error);
            }
            cell.state = BridgeState::Failed;
            cell.last_error = Some(error.to_string());
        }
        tracing::error!("Bridge failed to start: {}", error);

        let exit = {
            let mut active = self.active.lock().await;
            match active.take() {
                Some(run) if run.generation == generation => self.force_teardown(run).await,
                other => {
                    *active = other;
                    None
                }
            }
        };

        let mut cell = self.status.write().await;
        if cell.generation == generation && cell.state == BridgeState::Failed {
            cell.state = BridgeState::Stopped;
            cell.clear_run();
            if let Some(exit) = exit {
                cell.last_exit_code = cell.last_exit_code.or(exit.code);
            }
        }
        Err(error)
    }

    /// Stops the bridge: SIGINT or `docker stop`, then a kill after the grace
    /// window. Always ends `Stopped`.
    pub async fn stop(&self) -> Result<(), BridgeError> {
        {
            let mut cell = self.status.write().await;
            let state = cell.state;
            match state {
                BridgeState::Stopped | BridgeState::Failed => {
                    drop(cell);
                    self.reap_stale().await;
                    return Ok(());
                }
                BridgeState::Stopping => {}
                BridgeState::Starting | BridgeState::Running => {
                    cell.state = BridgeState::Stopping;
                    if let Some(stop) = &cell.stop {
                        stop.cancel();
                    }
                }
            }
        }

        tracing::info!("Stopping bridge");
        let mut active = self.active.lock().await;
        let exit = match active.take() {
            Some(run) => self.graceful_teardown(run).await,
            None => None,
        };

        let mut cell = self.status.write().await;
        cell.state = BridgeState::Stopped;
        cell.clear_run();
        if let Some(exit) = exit {
            cell.last_exit_code = exit.code;
        }
        drop(cell);
        drop(active);

        tracing::info!("Bridge stopped");
        Ok(())
    }

    /// Cleans up after a run that exited on its own.
    async fn reap_stale(&self) {
        let stale = self.active.lock().await.take();
        if let Some(run) = stale {
            self.force_teardown(run).await;
        }
    }

    async fn graceful_teardown(&self, run: ActiveRun) -> Option<BridgeExit> {
        run.stop.cancel();
        let grace = self.settings.stop_grace;
        let handle = run.handle.clone();

        if handle.exit().is_none() {
            if let Err(e) = handle.terminate(grace).await {
                tracing::warn!("Graceful stop of bridge failed: {}", e);
            }
        }

        let exit = match tokio::time::timeout(grace, handle.wait()).await {
            Ok(exit) => Some(exit),
            Err(_) => {
                tracing::warn!("Bridge did not exit within {:?}, killing", grace);
                if let Err(e) = handle.kill().await {
                    tracing::warn!("Failed to kill bridge: {}", e);
                }
                tokio::time::timeout(KILL_WAIT, handle.wait()).await.ok()
            }
        };

        self.finish_run(run).await;
        exit
    }

    async fn force_teardown(&self, run: ActiveRun) -> Option<BridgeExit> {
        run.stop.cancel();
        let handle = run.handle.clone();
        if handle.exit().is_none() {
            if let Err(e) = handle.kill().await {
                tracing::warn!("Failed to kill bridge: {}", e);
            }
        }
        let exit = tokio::time::timeout(KILL_WAIT, handle.wait()).await.ok();
        self.finish_run(run).await;
        exit
    }

    async fn finish_run(&self, run: ActiveRun) {
        let deadline = tokio::time::Instant::now() + JOIN_TIMEOUT;
        for mut task in run.tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                run.drain.cancel();
                task.abort();
            }
        }
        run.drain.cancel();

        if let Err(e) = run.handle.cleanup().await {
            tracing::debug!("Bridge cleanup failed: {}", e);
        }
    }

    /// Whether the bridge is up. The container runtime re-checks with the
    /// engine and records a dead container as `Stopped`.
    pub async fn is_running(&self) -> bool {
        let (generation, handle) = {
            let cell = self.status.read().await;
            if cell.state != BridgeState::Running {
                return false;
            }
            match &cell.handle {
                Some(handle) => (cell.generation, handle.clone()),
                None => return false,
            }
        };

        if !handle.verifies_liveness() {
            return handle.exit().is_none();
        }
        if handle.is_alive().await {
            return true;
        }

        let mut cell = self.status.write().await;
        if cell.generation == generation && cell.state == BridgeState::Running {
            tracing::warn!("Bridge {} is no longer running", handle.describe());
            cell.state = BridgeState::Stopped;
            cell.last_error = Some(format!("{} is no longer running", handle.describe()));
            cell.clear_run();
        }
        false
    }

    pub async fn state(&self) -> BridgeState {
        self.status.read().await.state
    }

    pub async fn last_error(&self) -> Option<String> {
        self.status.read().await.last_error.clone()
    }

    pub async fn status(&self) -> BridgeStatus {
        self.status
            .read()
            .await
            .snapshot(self.settings.rtsp_port, self.settings.web_port)
    }

    /// True until the run has been up for the connect grace period.
    pub async fn in_grace_period(&self) -> bool {
        self.status
            .read()
            .await
            .started_at
            .map_or(true, |t| t.elapsed() < self.settings.connect_grace)
    }

    pub fn stream_url(&self, name: &str, substream: bool) -> String {
        let suffix = if substream { "_sub" } else { "" };
        format!(
            "rtsp://localhost:{}/{}{}",
            self.settings.rtsp_port,
            naming::sanitize(name),
            suffix
        )
    }

    pub fn snapshot_url(&self, name: &str) -> String {
        format!(
            "http://127.0.0.1:{}/img/{}.jpg",
            self.settings.web_port,
            naming::sanitize(name)
        )
    }

    pub async fn list_bridge_cameras(&self) -> Result<HashMap<String, BridgeCamera>, BridgeError> {
        self.api.list_cameras(probe::LIST_TIMEOUT).await
    }

    /// Normalized names of the cameras the bridge reports as connected.
    ///
    /// `None` while the bridge is down, inside its grace period, or when the
    /// listing fails; callers must not treat that as "disconnected".
    pub async fn connected_devices(&self) -> Option<HashSet<String>> {
        if !self.is_running().await || self.in_grace_period().await {
            return None;
        }

        match self.api.list_cameras(CONNECT_QUERY_TIMEOUT).await {
            Ok(cameras) => Some(
                cameras
                    .into_iter()
                    .filter(|(_, camera)| camera.connected)
                    .flat_map(|(key, camera)| {
                        let mut names = vec![naming::normalize(&key)];
                        if !camera.name_uri.is_empty() {
                            names.push(naming::normalize(&camera.name_uri));
                        }
                        names
                    })
                    .collect(),
            ),
            Err(e) => {
                tracing::debug!("Bridge camera listing failed: {}", e);
                None
            }
        }
    }

    pub async fn is_device_connected(&self, name: &str) -> bool {
        self.connected_devices()
            .await
            .is_some_and(|connected| connected.contains(&naming::normalize(name)))
    }
}

async fn monitor_exit(
    handle: Arc<dyn BridgeHandle>,
    status: Arc<RwLock<StatusCell>>,
    generation: u64,
    stop: CancellationToken,
) {
    let exit = tokio::select! {
        _ = stop.cancelled() => return,
        exit = handle.wait() => exit,
    };

    let mut cell = status.write().await;
    if cell.generation != generation {
        return;
    }
    cell.last_exit_code = exit.code;

    // Exits during start are reported by the readiness wait.
    if cell.state == BridgeState::Running {
        let error = BridgeError::ExitedEarly(exit.code);
        tracing::warn!("{} ({})", error, handle.describe());
        cell.state = BridgeState::Stopped;
        cell.last_error = Some(error.to_string());
        cell.clear_run();
    }
}
