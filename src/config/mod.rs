pub mod loader;
pub mod schema;

pub use loader::{load_from_env_or_file, load_from_path, validate};
pub use schema::{
    resolve_port, BridgeConfig, CameraFilter, PluginConfig, RuntimeKind, RuntimeSettings,
    DEFAULT_RTSP_PORT, DEFAULT_WEB_PORT, RTSP_PORT_ENV, WEB_PORT_ENV,
};
