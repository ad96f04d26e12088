use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::BridgeError;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
pub const LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// One entry of the bridge's `/api/cameras` listing.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BridgeCamera {
    pub name_uri: String,
    pub product_model: String,
    pub connected: bool,
    pub enabled: bool,
    pub on_demand: bool,
    pub audio: bool,
    pub recording: bool,
    pub uri: String,
    pub rtsp_uri: String,
    pub hls_uri: String,
    pub webrtc_uri: String,
}

/// The bridge answers 401 when its web auth is on, which still means it is up.
pub fn is_ready_status(status: u16) -> bool {
    status == 200 || status == 401
}

/// Client for the bridge's local web API.
#[derive(Clone)]
pub struct BridgeApi {
    client: Client,
    base_url: String,
}

impl BridgeApi {
    pub fn new(web_port: u16) -> Self {
        Self::with_base_url(format!("http://127.0.0.1:{web_port}"))
    }

    /// The bridge is always local, so proxy variables are ignored.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder().no_proxy().build().unwrap_or_else(|e| {
            tracing::warn!("Failed to build bridge API client: {}", e);
            Client::new()
        });
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn cameras_url(&self) -> String {
        format!("{}/api/cameras", self.base_url)
    }

    /// Single readiness check; any transport error counts as not ready.
    pub async fn probe(&self) -> bool {
        match self
            .client
            .get(self.cameras_url())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => is_ready_status(response.status().as_u16()),
            Err(e) => {
                tracing::trace!("Readiness probe failed: {}", e);
                false
            }
        }
    }

    pub async fn list_cameras(
        &self,
        timeout: Duration,
    ) -> Result<HashMap<String, BridgeCamera>, BridgeError> {
        let response = self
            .client
            .get(self.cameras_url())
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Status(status.as_u16()));
        }

        Ok(response.json().await?)
    }
}
