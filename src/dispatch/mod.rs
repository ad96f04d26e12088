//! Line-delimited control protocol loop.
//!
//! One request per input line, one response per output line, strictly in
//! order. Nothing but responses is ever written to the output stream.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::PluginConfig;
use crate::error::{ConfigError, PluginError};
use crate::plugin::PluginController;
use crate::protocol::{
    status_ok, AddCameraParams, CameraIdParams, ControlError, ControlRequest, ControlResponse,
    PtzParams, PARSE_ERROR,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Initialize,
    Shutdown,
    Health,
    DiscoverCameras,
    AddCamera,
    RemoveCamera,
    ListCameras,
    GetCamera,
    PtzControl,
    GetSnapshot,
}

impl Method {
    pub const ALL: [Method; 10] = [
        Method::Initialize,
        Method::Shutdown,
        Method::Health,
        Method::DiscoverCameras,
        Method::AddCamera,
        Method::RemoveCamera,
        Method::ListCameras,
        Method::GetCamera,
        Method::PtzControl,
        Method::GetSnapshot,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::Initialize => "initialize",
            Method::Shutdown => "shutdown",
            Method::Health => "health",
            Method::DiscoverCameras => "discover_cameras",
            Method::AddCamera => "add_camera",
            Method::RemoveCamera => "remove_camera",
            Method::ListCameras => "list_cameras",
            Method::GetCamera => "get_camera",
            Method::PtzControl => "ptz_control",
            Method::GetSnapshot => "get_snapshot",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }
}

/// Why a handler failed, before it is put on the wire.
enum Failure {
    Params(String),
    Plugin(PluginError),
}

impl From<PluginError> for Failure {
    fn from(error: PluginError) -> Self {
        Failure::Plugin(error)
    }
}

impl From<Failure> for ControlError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Params(reason) => ControlError::invalid_params(reason),
            Failure::Plugin(error) => ControlError::internal(error.to_string()),
        }
    }
}

type HandlerResult = std::result::Result<Value, Failure>;

pub struct Dispatcher {
    controller: Arc<PluginController>,
}

impl Dispatcher {
    pub fn new(controller: Arc<PluginController>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<PluginController> {
        &self.controller
    }

    /// Decodes one input line. `None` for blank or malformed lines, which get
    /// no response.
    pub async fn handle_line(&self, line: &str) -> Option<ControlResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str::<ControlRequest>(line) {
            Ok(request) => Some(self.handle(request).await),
            Err(e) => {
                tracing::warn!(code = PARSE_ERROR, "Skipping malformed request: {}", e);
                None
            }
        }
    }

    pub async fn handle(&self, request: ControlRequest) -> ControlResponse {
        let ControlRequest {
            id, method, params, ..
        } = request;

        let Some(method) = Method::from_name(&method) else {
            tracing::debug!("Unknown method: {}", method);
            return ControlResponse::failure(id, ControlError::method_not_found(&method));
        };

        tracing::debug!(method = method.name(), "Handling request");
        match self.route(method, params).await {
            Ok(result) => ControlResponse::success(id, result),
            Err(failure) => {
                let error = ControlError::from(failure);
                tracing::debug!(method = method.name(), code = error.code, "{}", error.message);
                ControlResponse::failure(id, error)
            }
        }
    }

    async fn route(&self, method: Method, params: Option<Value>) -> HandlerResult {
        let controller = &self.controller;
        match method {
            Method::Initialize => {
                let config: PluginConfig = match params {
                    None | Some(Value::Null) => {
                        return Err(Failure::Plugin(
                            ConfigError::MissingField("configuration".into()).into(),
                        ))
                    }
                    Some(value) => decode(Some(value))?,
                };
                controller.initialize(config).await?;
                Ok(status_ok())
            }
            Method::Shutdown => {
                controller.shutdown().await?;
                Ok(status_ok())
            }
            Method::Health => encode(&controller.health().await),
            Method::DiscoverCameras => encode(&controller.discover_cameras().await?),
            Method::AddCamera => {
                let params: AddCameraParams = decode(params)?;
                encode(&controller.add_camera(params).await?)
            }
            Method::RemoveCamera => {
                let params: CameraIdParams = decode(params)?;
                controller.remove_camera(&params.camera_id).await?;
                Ok(status_ok())
            }
            Method::ListCameras => encode(&controller.list_cameras().await),
            Method::GetCamera => {
                let params: CameraIdParams = decode(params)?;
                encode(&controller.get_camera(&params.camera_id).await?)
            }
            Method::PtzControl => {
                let params: PtzParams = decode(params)?;
                controller
                    .ptz_control(&params.camera_id, &params.command)
                    .await?;
                Ok(status_ok())
            }
            Method::GetSnapshot => {
                let params: CameraIdParams = decode(params)?;
                Ok(Value::String(
                    controller.get_snapshot(&params.camera_id).await?,
                ))
            }
        }
    }

    /// Serves until EOF or until `shutdown` resolves, then shuts the
    /// controller down. Responses are flushed before the next line is read.
    pub async fn serve<R, W>(
        &self,
        mut reader: R,
        mut writer: W,
        shutdown: impl Future<Output = ()>,
    ) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tokio::pin!(shutdown);
        // read_until keeps partial bytes in `buf` if the select drops it
        let mut buf = Vec::new();

        let outcome = loop {
            let read = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    break Ok(());
                }
                read = reader.read_until(b'\n', &mut buf) => read,
            };

            match read {
                Ok(0) => {
                    tracing::info!("Input closed, shutting down");
                    break Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Failed to read request: {}", e);
                    break Err(e);
                }
            }

            let line = match String::from_utf8(std::mem::take(&mut buf)) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(code = PARSE_ERROR, "Skipping request that is not UTF-8: {}", e);
                    continue;
                }
            };

            let Some(response) = self.handle_line(&line).await else {
                continue;
            };
            if let Err(e) = write_response(&mut writer, &response).await {
                tracing::error!("Failed to write response: {}", e);
                break Err(e);
            }
        };

        if let Err(e) = self.controller.shutdown().await {
            tracing::warn!("Shutdown failed: {}", e);
        }
        outcome
    }
}

async fn write_response<W>(writer: &mut W, response: &ControlResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    writer.write_all(&payload).await?;
    writer.flush().await
}

fn decode<T: DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, Failure> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| Failure::Params(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| Failure::Plugin(e.into()))
}
