use std::collections::BTreeMap;
use std::path::Path;

use crate::config::BridgeConfig;

/// Inherited variables the bridge must not see (pre-2.10 bridges choke on `WEB_PATH`).
const STRIPPED_VARS: &[&str] = &["WEB_PATH"];

// MediaMTX listeners moved off the go2rtc defaults (8554/8555/8189).
const WEBRTC_ADDRESS: &str = ":8561";
const HLS_ADDRESS: &str = ":8562";
const WEBRTC_ICE_UDP_MUX_ADDRESS: &str = ":8563";

/// Builds the bridge environment. Ordered so the same config always yields the same launch.
pub fn build_environment(
    config: &BridgeConfig,
    data_dir: &Path,
    mtx_config: Option<&Path>,
) -> BTreeMap<String, String> {
    let token_path = data_dir.join("tokens");
    let img_path = data_dir.join("img");

    let mut env = BTreeMap::new();
    let mut set = |key: &str, value: String| {
        env.insert(key.to_string(), value);
    };

    set("WYZE_EMAIL", config.email.clone());
    set("WYZE_PASSWORD", config.password.clone());

    set("WB_RTSP_PORT", config.rtsp_port.to_string());
    set("WB_PORT", config.web_port.to_string());
    set("MTX_RTSPADDRESS", format!(":{}", config.rtsp_port));
    set("MTX_WEBRTCADDRESS", WEBRTC_ADDRESS.to_string());
    set("MTX_WEBRTCICEUDPMUXADDRESS", WEBRTC_ICE_UDP_MUX_ADDRESS.to_string());
    set("MTX_HLSADDRESS", HLS_ADDRESS.to_string());
    set("MTX_RTMPADDRESS", String::new());

    set("TOKEN_PATH", format!("{}/", token_path.display()));
    set("IMG_PATH", format!("{}/", img_path.display()));
    if let Some(mtx_config) = mtx_config {
        set("MTX_CONFIG", mtx_config.display().to_string());
    }

    set("ENABLE_AUDIO", "True".to_string());
    set("ON_DEMAND", "False".to_string());
    set("SNAPSHOT", "API".to_string());
    set("QUALITY", "HD".to_string());
    set("WB_AUTH", "False".to_string());

    if let Some(key_id) = &config.key_id {
        set("API_ID", key_id.clone());
    }
    if let Some(api_key) = &config.api_key {
        set("API_KEY", api_key.clone());
    }
    if let Some(totp_key) = &config.totp_key {
        set("TOTP_KEY", totp_key.clone());
    }
    if !config.filter_macs.is_empty() {
        set("FILTER_MACS", config.filter_macs.join(","));
    }

    env
}

/// True for inherited variables that must be removed before launch.
pub fn is_stripped(key: &str) -> bool {
    STRIPPED_VARS.contains(&key)
}
