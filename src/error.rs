use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("{0}")]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Login failed: {0}")]
    AuthFailed(String),

    #[error("MFA required but no TOTP key provided")]
    MfaRequired,

    #[error("API error: {0}")]
    Api(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("P2P token not found for {0}")]
    TokenNotFound(String),

    #[error("Invalid TOTP key")]
    InvalidTotpKey,
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to launch bridge: {0}")]
    LaunchFailed(String),

    #[error("Bridge process exited unexpectedly{}", exit_suffix(.0))]
    ExitedEarly(Option<i32>),

    #[error("Timeout waiting for bridge to start after {0:?}")]
    ReadinessTimeout(Duration),

    #[error("Bridge start cancelled")]
    Cancelled,

    #[error("Bridge is stopping")]
    Stopping,

    #[error("Container command `{command}` failed: {reason}")]
    Container { command: String, reason: String },

    #[error("Failed to signal bridge process: {0}")]
    Signal(String),

    #[error("Bridge API returned status {0}")]
    Status(u16),

    #[error("Bridge API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with code {code}"),
        None => String::new(),
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Camera not found: {0}")]
    CameraNotFound(String),

    #[error("Plugin not initialized")]
    NotInitialized,

    #[error("{0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, PluginError>;
