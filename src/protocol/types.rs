use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bridge::BridgeState;

pub const PLUGIN_ID: &str = "wyze";
pub const MANUFACTURER: &str = "Wyze";

/// Camera as returned by `add_camera`, `get_camera` and `list_cameras`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginCamera {
    pub id: String,
    pub plugin_id: String,
    pub name: String,
    pub model: String,
    pub host: String,
    pub main_stream: String,
    pub sub_stream: String,
    pub snapshot_url: String,
    pub capabilities: Vec<String>,
    pub online: bool,
    pub last_seen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredCamera {
    pub id: String,
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub host: String,
    pub port: u16,
    pub channels: u32,
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub state: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check: String,
    pub details: HealthDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthDetails {
    pub cameras_online: usize,
    pub cameras_total: usize,
    pub authenticated: bool,
    pub bridge_running: bool,
    pub bridge_state: BridgeState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCameraParams {
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraIdParams {
    pub camera_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtzParams {
    pub camera_id: String,
    pub command: PtzCommand,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PtzCommand {
    pub action: String,
    #[serde(default)]
    pub direction: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
}

/// `{"status": "ok"}`
pub fn status_ok() -> Value {
    serde_json::json!({ "status": "ok" })
}
