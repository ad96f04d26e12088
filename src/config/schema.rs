use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default RTSP port. Avoids go2rtc (8554/8555) and earlier plugin instances.
pub const DEFAULT_RTSP_PORT: u16 = 8564;
/// Default web API port. Avoids macOS AirPlay on 5000.
pub const DEFAULT_WEB_PORT: u16 = 5002;

pub const RTSP_PORT_ENV: &str = "WYZE_RTSP_PORT";
pub const WEB_PORT_ENV: &str = "WYZE_WEB_PORT";

/// Session configuration received through the `initialize` method.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totp_key: Option<String>,
    #[serde(default)]
    pub cameras: Vec<CameraFilter>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtsp_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<PathBuf>,
}

/// Allow-list entry. An empty `mac` makes the entry inert.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CameraFilter {
    #[serde(default)]
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl PluginConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.email.trim().is_empty() || self.password.is_empty() {
            return Err(ConfigError::Validation(
                "email and password are required".into(),
            ));
        }
        Ok(())
    }

    pub fn key_id(&self) -> Option<&str> {
        non_empty(&self.key_id)
    }

    pub fn api_key(&self) -> Option<&str> {
        non_empty(&self.api_key)
    }

    pub fn totp_key(&self) -> Option<&str> {
        non_empty(&self.totp_key)
    }

    /// Allow-list entries that carry an identifier.
    pub fn allow_list(&self) -> impl Iterator<Item = &CameraFilter> {
        self.cameras.iter().filter(|f| !f.mac.trim().is_empty())
    }

    /// Decides whether a device is included and under which display name.
    ///
    /// Returns `None` when an allow-list is configured and the device is not on it.
    pub fn admit(&self, mac: &str, nickname: &str) -> Option<String> {
        let mut filters = self.allow_list().peekable();
        if filters.peek().is_none() {
            return Some(nickname.to_string());
        }

        filters.find(|f| f.mac == mac).map(|f| match &f.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => nickname.to_string(),
        })
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            email: self.email.clone(),
            password: self.password.clone(),
            key_id: self.key_id().map(str::to_string),
            api_key: self.api_key().map(str::to_string),
            totp_key: self.totp_key().map(str::to_string),
            filter_macs: self.allow_list().map(|f| f.mac.clone()).collect(),
            rtsp_port: resolve_port(self.rtsp_port, RTSP_PORT_ENV, DEFAULT_RTSP_PORT),
            web_port: resolve_port(self.web_port, WEB_PORT_ENV, DEFAULT_WEB_PORT),
            data_path: self.data_path.clone(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Everything the supervisor needs to launch one bridge instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    pub email: String,
    pub password: String,
    pub key_id: Option<String>,
    pub api_key: Option<String>,
    pub totp_key: Option<String>,
    pub filter_macs: Vec<String>,
    pub rtsp_port: u16,
    pub web_port: u16,
    pub data_path: Option<PathBuf>,
}

/// Port precedence: explicit value, then environment, then default.
pub fn resolve_port(explicit: Option<u16>, env_key: &str, default: u16) -> u16 {
    pick_port(explicit, std::env::var(env_key).ok().as_deref(), default)
}

pub(crate) fn pick_port(explicit: Option<u16>, env_value: Option<&str>, default: u16) -> u16 {
    explicit
        .filter(|port| *port != 0)
        .or_else(|| {
            env_value
                .and_then(|v| v.trim().parse::<u16>().ok())
                .filter(|port| *port != 0)
        })
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Process,
    Container,
}

/// Process-level settings, loaded once at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub plugin_dir: PathBuf,
    pub runtime: RuntimeKind,
    pub python: String,
    pub bridge_dir: Option<PathBuf>,
    pub bridge_script: String,
    pub container_image: String,
    pub container_name: String,
    pub startup_timeout_secs: u64,
    pub stop_grace_secs: u64,
    pub status_refresh_secs: u64,
    pub bridge_log_file: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            plugin_dir: default_plugin_dir(),
            runtime: RuntimeKind::Process,
            python: "python3".to_string(),
            bridge_dir: None,
            bridge_script: "frontend.py".to_string(),
            container_image: "mrlt8/wyze-bridge:latest".to_string(),
            container_name: "wyze-bridge-plugin".to_string(),
            startup_timeout_secs: 60,
            stop_grace_secs: 5,
            status_refresh_secs: 30,
            bridge_log_file: true,
        }
    }
}

fn default_plugin_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .or_else(|| dirs::data_local_dir().map(|dir| dir.join("wyze-plugin")))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl RuntimeSettings {
    pub fn bridge_dir(&self) -> PathBuf {
        self.bridge_dir
            .clone()
            .unwrap_or_else(|| self.plugin_dir.join("wyze-bridge").join("app"))
    }

    /// Data directory for a session; `explicit` comes from `initialize`.
    pub fn data_dir(&self, explicit: Option<&PathBuf>) -> PathBuf {
        explicit
            .cloned()
            .unwrap_or_else(|| self.plugin_dir.join("data"))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn status_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.status_refresh_secs)
    }
}
