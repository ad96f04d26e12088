use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::runtime::BridgeHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Bookkeeping guarded by the supervisor's status lock.
pub(crate) struct StatusCell {
    pub state: BridgeState,
    pub generation: u64,
    pub started_at: Option<Instant>,
    pub started_wall: Option<DateTime<Utc>>,
    pub handle: Option<Arc<dyn BridgeHandle>>,
    /// Stop token of the current run.
    pub stop: Option<CancellationToken>,
    pub last_error: Option<String>,
    pub last_exit_code: Option<i32>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self {
            state: BridgeState::Stopped,
            generation: 0,
            started_at: None,
            started_wall: None,
            handle: None,
            stop: None,
            last_error: None,
            last_exit_code: None,
        }
    }

    /// Forgets the current run, keeping its error and exit code.
    pub fn clear_run(&mut self) {
        self.started_at = None;
        self.started_wall = None;
        self.handle = None;
        self.stop = None;
    }

    pub fn snapshot(&self, rtsp_port: u16, web_port: u16) -> BridgeStatus {
        BridgeStatus {
            state: self.state,
            instance: self.handle.as_ref().map(|h| h.describe()),
            started_at: self.started_wall,
            uptime_secs: self.started_at.map(|t| t.elapsed().as_secs()),
            last_error: self.last_error.clone(),
            last_exit_code: self.last_exit_code,
            rtsp_port,
            web_port,
        }
    }
}

/// Point-in-time view of the supervised bridge.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub state: BridgeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit_code: Option<i32>,
    pub rtsp_port: u16,
    pub web_port: u16,
}
