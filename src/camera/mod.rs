//! Camera records, model capabilities and PTZ translation.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

use crate::bridge::BridgeSupervisor;
use crate::cloud::Device;
use crate::error::RegistryError;
use crate::protocol::{DiscoveredCamera, PluginCamera, PtzCommand, MANUFACTURER, PLUGIN_ID};

pub mod registry;

pub use registry::CameraRegistry;

/// Product models the bridge can stream.
pub const CAMERA_MODELS: &[&str] = &[
    "WYZECP1",    // Cam Pan
    "WYZEC1",     // Cam v1
    "WYZEC1-JZ",  // Cam v2
    "WYZE_CAKP2", // Cam v3
    "HL_CAM3P",   // Cam v3 Pro
    "HL_PAN2",    // Cam Pan v2
    "HL_PAN3",    // Cam Pan v3
    "HL_PANP",    // Cam Pan Pro
    "WYZEDB3",    // Video Doorbell v1
    "GW_BE1",     // Video Doorbell v2
    "GW_GC1",     // Video Doorbell Pro
    "AN_RSCW",    // Cam OG
    "AN_RLT",     // Cam OG Telephoto
    "HL_WCO2",    // Cam Outdoor v2
    "WVOD1",      // Cam Outdoor v1
    "HL_CFL1",    // Cam Floodlight
    "HL_CFL2",    // Cam Floodlight v2
];

pub fn is_camera_model(model: &str) -> bool {
    CAMERA_MODELS.contains(&model)
}

pub fn supports_ptz(model: &str) -> bool {
    model.contains("PAN") || model.contains("CP1")
}

/// Capability tags derived from the product model.
pub fn capabilities(model: &str) -> Vec<String> {
    let mut caps = vec!["video", "snapshot"];

    if supports_ptz(model) {
        caps.push("ptz");
    }
    if is_camera_model(model) {
        caps.extend(["audio", "two_way_audio", "motion"]);
    }
    if model.contains("DB") || model.contains("GW_") {
        caps.push("doorbell");
    }
    if model.contains("WCO") || model.contains("WVOD") {
        caps.push("battery");
    }
    if model.contains("CFL") {
        caps.push("floodlight");
    }

    caps.into_iter().map(String::from).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtzMove {
    Left,
    Right,
    Up,
    Down,
    Stop,
}

impl fmt::Display for PtzMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PtzMove::Left => "left",
            PtzMove::Right => "right",
            PtzMove::Up => "up",
            PtzMove::Down => "down",
            PtzMove::Stop => "stop",
        };
        f.write_str(name)
    }
}

/// Maps a PTZ request onto a movement. Negative directions pan left and tilt down.
pub fn translate_ptz(model: &str, command: &PtzCommand) -> Result<PtzMove, RegistryError> {
    if !supports_ptz(model) {
        return Err(RegistryError::Unsupported(
            "camera does not support PTZ".into(),
        ));
    }

    match command.action.as_str() {
        "pan" if command.direction < 0.0 => Ok(PtzMove::Left),
        "pan" => Ok(PtzMove::Right),
        "tilt" if command.direction < 0.0 => Ok(PtzMove::Down),
        "tilt" => Ok(PtzMove::Up),
        "stop" => Ok(PtzMove::Stop),
        "preset" => Err(RegistryError::Unsupported(
            "presets not supported on Wyze cameras".into(),
        )),
        other => Err(RegistryError::Unsupported(format!("unknown action: {other}"))),
    }
}

/// One registered camera. The P2P token is per-session soft state.
#[derive(Debug, Clone)]
pub struct CameraRecord {
    pub id: String,
    pub name: String,
    pub model: String,
    pub firmware_version: String,
    pub capabilities: Vec<String>,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    pub p2p_token: Option<String>,
}

impl CameraRecord {
    /// Record for a cloud device, shown under `name`.
    pub fn from_device(device: &Device, name: impl Into<String>) -> Self {
        Self {
            id: device.mac.clone(),
            name: name.into(),
            model: device.product_model.clone(),
            firmware_version: device.firmware_version.clone(),
            capabilities: capabilities(&device.product_model),
            online: device.online,
            last_seen: Utc::now(),
            p2p_token: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.p2p_token.is_some()
    }

    pub fn connect(&mut self, token: String) {
        self.p2p_token = Some(token);
        self.online = true;
        self.last_seen = Utc::now();
    }

    /// Drops session state only; the shared bridge keeps running.
    pub fn disconnect(&mut self) {
        if self.p2p_token.take().is_some() {
            tracing::debug!("Disconnected camera {} ({})", self.name, self.id);
        }
    }

    /// Wire view with URLs derived from the supervisor on every call.
    pub fn to_plugin_camera(&self, bridge: &BridgeSupervisor) -> PluginCamera {
        PluginCamera {
            id: self.id.clone(),
            plugin_id: PLUGIN_ID.to_string(),
            name: self.name.clone(),
            model: self.model.clone(),
            host: "localhost".to_string(),
            main_stream: bridge.stream_url(&self.name, false),
            sub_stream: bridge.stream_url(&self.name, true),
            snapshot_url: bridge.snapshot_url(&self.name),
            capabilities: self.capabilities.clone(),
            online: self.online,
            last_seen: self.last_seen.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

pub fn to_discovered(device: &Device) -> DiscoveredCamera {
    DiscoveredCamera {
        id: device.mac.clone(),
        name: device.nickname.clone(),
        model: device.product_model.clone(),
        manufacturer: MANUFACTURER.to_string(),
        host: String::new(),
        port: 0,
        channels: 1,
        capabilities: capabilities(&device.product_model),
        firmware_version: Some(device.firmware_version.clone()).filter(|v| !v.is_empty()),
        serial: Some(device.mac.clone()).filter(|v| !v.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{create_runtime, SupervisorSettings};
    use crate::config::RuntimeSettings;
    use std::path::PathBuf;

    fn ptz(action: &str, direction: f64) -> PtzCommand {
        PtzCommand {
            action: action.into(),
            direction,
            ..Default::default()
        }
    }

    #[test]
    fn test_camera_models() {
        assert!(is_camera_model("WYZE_CAKP2"));
        assert!(is_camera_model("HL_CFL2"));
        assert!(!is_camera_model("WLPP1"));
        assert!(!is_camera_model("wyze_cakp2"));
    }

    #[test]
    fn test_capabilities_by_model() {
        assert_eq!(
            capabilities("WYZE_CAKP2"),
            ["video", "snapshot", "audio", "two_way_audio", "motion"]
        );
        assert!(capabilities("HL_PAN3").contains(&"ptz".to_string()));
        assert!(capabilities("WYZECP1").contains(&"ptz".to_string()));
        assert!(capabilities("WYZEDB3").contains(&"doorbell".to_string()));
        assert!(capabilities("GW_BE1").contains(&"doorbell".to_string()));
        assert!(capabilities("HL_WCO2").contains(&"battery".to_string()));
        assert!(capabilities("HL_CFL1").contains(&"floodlight".to_string()));
        assert_eq!(capabilities("WLPP1"), ["video", "snapshot"]);
    }

    #[test]
    fn test_ptz_translation() {
        assert_eq!(translate_ptz("HL_PAN3", &ptz("pan", -1.0)).unwrap(), PtzMove::Left);
        assert_eq!(translate_ptz("HL_PAN3", &ptz("pan", 0.0)).unwrap(), PtzMove::Right);
        assert_eq!(translate_ptz("HL_PAN3", &ptz("tilt", -0.5)).unwrap(), PtzMove::Down);
        assert_eq!(translate_ptz("HL_PAN3", &ptz("tilt", 1.0)).unwrap(), PtzMove::Up);
        assert_eq!(translate_ptz("HL_PAN3", &ptz("stop", 0.0)).unwrap(), PtzMove::Stop);
    }

    #[test]
    fn test_ptz_rejections() {
        let err = translate_ptz("WYZE_CAKP2", &ptz("pan", 1.0)).unwrap_err();
        assert_eq!(err.to_string(), "camera does not support PTZ");

        let err = translate_ptz("HL_PAN3", &ptz("preset", 0.0)).unwrap_err();
        assert_eq!(err.to_string(), "presets not supported on Wyze cameras");

        let err = translate_ptz("HL_PAN3", &ptz("zoom", 0.0)).unwrap_err();
        assert_eq!(err.to_string(), "unknown action: zoom");
    }

    #[test]
    fn test_record_connect_and_disconnect() {
        let device = Device {
            mac: "AA".into(),
            nickname: "Pet Cam".into(),
            product_model: "WYZE_CAKP2".into(),
            ..Default::default()
        };
        let mut record = CameraRecord::from_device(&device, "Living Room");
        assert_eq!(record.name, "Living Room");
        assert!(!record.online);

        record.connect("token".into());
        assert!(record.online);
        assert!(record.is_connected());

        record.disconnect();
        assert!(!record.is_connected());
        assert!(record.online);
    }

    #[test]
    fn test_plugin_camera_urls() {
        let device = Device {
            mac: "AA".into(),
            nickname: "Pet Cam".into(),
            product_model: "WYZE_CAKP2".into(),
            ..Default::default()
        };
        let record = CameraRecord::from_device(&device, "Pet Cam");
        let bridge = BridgeSupervisor::new(
            create_runtime(&RuntimeSettings::default()),
            SupervisorSettings::new(8564, 5002, PathBuf::from("/tmp/wyze")),
        );

        let camera = record.to_plugin_camera(&bridge);
        assert_eq!(camera.plugin_id, "wyze");
        assert_eq!(camera.main_stream, "rtsp://localhost:8564/pet-cam");
        assert_eq!(camera.sub_stream, "rtsp://localhost:8564/pet-cam_sub");
        assert_eq!(camera.snapshot_url, "http://127.0.0.1:5002/img/pet-cam.jpg");
        assert!(camera.last_seen.ends_with('Z'));
    }

    #[test]
    fn test_discovered_camera() {
        let device = Device {
            mac: "AA".into(),
            nickname: "Porch".into(),
            product_model: "WYZEDB3".into(),
            firmware_version: "4.25.1".into(),
            ..Default::default()
        };
        let discovered = to_discovered(&device);
        assert_eq!(discovered.manufacturer, "Wyze");
        assert_eq!(discovered.serial.as_deref(), Some("AA"));
        assert_eq!(discovered.firmware_version.as_deref(), Some("4.25.1"));
    }
}
