//! Vendor cloud: login, device enumeration and per-device P2P tokens.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CloudError;

pub mod client;
pub mod totp;

pub use client::{CloudEndpoints, Credentials, WyzeCloud};

/// A device as listed by the cloud's home-page object list.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Device {
    pub mac: String,
    pub nickname: String,
    pub product_model: String,
    pub product_type: String,
    #[serde(rename = "firmware_ver")]
    pub firmware_version: String,
    #[serde(rename = "device_online", deserialize_with = "flag")]
    pub online: bool,
    pub p2p_id: String,
    pub p2p_type: i64,
    #[serde(rename = "enr")]
    pub enr_token: String,
    pub parent_dtls: i64,
}

// The cloud reports booleans as `true`, `1` or `"1"` depending on the endpoint.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        serde_json::Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn login(&self) -> Result<(), CloudError>;

    /// Holds an unexpired access token.
    async fn is_authenticated(&self) -> bool;

    async fn list_devices(&self) -> Result<Vec<Device>, CloudError>;

    async fn p2p_token(&self, mac: &str) -> Result<String, CloudError>;
}
