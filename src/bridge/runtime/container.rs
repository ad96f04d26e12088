//! Bridge as a container driven through the engine CLI.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use super::{BridgeExit, BridgeHandle, BridgeRuntime, ExitWatch, LaunchSpec, Launched, OutputStream};
use crate::config::{RuntimeKind, RuntimeSettings};
use crate::error::BridgeError;

const CONTAINER_DATA_DIR: &str = "/data";
const RESTART_POLICY: &str = "unless-stopped";
// MediaMTX WebRTC and HLS listeners, published alongside the configured ports.
const EXTRA_PORTS: &[u16] = &[8561, 8562];

pub struct ContainerRuntime {
    engine: String,
    image: String,
    name: String,
}

impl ContainerRuntime {
    pub fn new(engine: impl Into<String>, image: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            image: image.into(),
            name: name.into(),
        }
    }

    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self::new(
            "docker",
            settings.container_image.clone(),
            settings.container_name.clone(),
        )
    }

    /// Arguments for `docker run`, in launch order.
    pub fn run_args(&self, spec: &LaunchSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--restart".to_string(),
            RESTART_POLICY.to_string(),
        ];

        let mut ports = vec![spec.rtsp_port, spec.web_port];
        ports.extend_from_slice(EXTRA_PORTS);
        for port in ports {
            args.push("-p".to_string());
            args.push(format!("{port}:{port}"));
        }

        args.push("-v".to_string());
        args.push(format!(
            "{}:{}",
            spec.data_dir.display(),
            CONTAINER_DATA_DIR
        ));

        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(self.image.clone());
        args
    }
}

#[async_trait]
impl BridgeRuntime for ContainerRuntime {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Launched, BridgeError> {
        // A container left over from a crashed session would hold the name.
        let _ = engine_output(&self.engine, &["rm", "-f", &self.name]).await;

        let args = self.run_args(spec);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = engine_output(&self.engine, &arg_refs).await.map_err(|e| match e {
            BridgeError::Container { reason, .. } => {
                BridgeError::LaunchFailed(format!("{} run: {}", self.engine, reason))
            }
            other => other,
        })?;

        let id = stdout.trim().to_string();
        if id.is_empty() {
            return Err(BridgeError::LaunchFailed(format!(
                "{} run returned no container id",
                self.engine
            )));
        }
        tracing::debug!(container = %short_id(&id), image = %self.image, "Started bridge container");

        let mut logs = Command::new(&self.engine)
            .args(["logs", "-f", &id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::LaunchFailed(format!("failed to follow logs: {e}")))?;

        let out = logs
            .stdout
            .take()
            .ok_or_else(|| BridgeError::LaunchFailed("failed to capture log stdout".into()))?;
        let err = logs
            .stderr
            .take()
            .ok_or_else(|| BridgeError::LaunchFailed("failed to capture log stderr".into()))?;

        let (exit_tx, exit) = ExitWatch::channel();
        {
            let engine = self.engine.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let code = wait_for_exit(&engine, &id).await;
                let _ = exit_tx.send(Some(BridgeExit { code }));
                let _ = logs.kill().await;
            });
        }

        Ok(Launched {
            handle: Arc::new(ContainerHandle {
                engine: self.engine.clone(),
                id,
                exit,
            }),
            outputs: vec![
                OutputStream {
                    name: "stdout",
                    reader: Box::new(out),
                },
                OutputStream {
                    name: "stderr",
                    reader: Box::new(err),
                },
            ],
        })
    }

    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Container
    }

    fn describe_command(&self) -> String {
        format!(
            "{} run -d --name {} --restart {} {}",
            self.engine, self.name, RESTART_POLICY, self.image
        )
    }

    fn data_dir_for(&self, _host_dir: &Path) -> PathBuf {
        PathBuf::from(CONTAINER_DATA_DIR)
    }
}

/// Blocks on `docker wait` until the container stops for good.
///
/// The engine restarts the container under `unless-stopped`, so a stop that
/// is followed by a running container is not treated as an exit.
async fn wait_for_exit(engine: &str, id: &str) -> Option<i32> {
    loop {
        let code = match engine_output(engine, &["wait", id]).await {
            Ok(out) => out.trim().parse::<i32>().ok(),
            Err(e) => {
                tracing::debug!(container = %short_id(id), "wait failed: {}", e);
                None
            }
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        match inspect_running(engine, id).await {
            Ok(true) => {
                tracing::warn!(container = %short_id(id), ?code, "Bridge container restarted by engine");
                continue;
            }
            _ => return code,
        }
    }
}

async fn inspect_running(engine: &str, id: &str) -> Result<bool, BridgeError> {
    let out = engine_output(engine, &["inspect", "-f", "{{.State.Running}}", id]).await?;
    Ok(out.trim() == "true")
}

async fn engine_output(engine: &str, args: &[&str]) -> Result<String, BridgeError> {
    let command = format!("{} {}", engine, args.first().copied().unwrap_or_default());
    let output = Command::new(engine)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| BridgeError::Container {
            command: command.clone(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(BridgeError::Container {
            command,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

pub struct ContainerHandle {
    engine: String,
    id: String,
    exit: ExitWatch,
}

#[async_trait]
impl BridgeHandle for ContainerHandle {
    fn describe(&self) -> String {
        format!("container {}", short_id(&self.id))
    }

    fn exit(&self) -> Option<BridgeExit> {
        self.exit.exited()
    }

    async fn wait(&self) -> BridgeExit {
        self.exit.wait().await
    }

    async fn terminate(&self, grace: Duration) -> Result<(), BridgeError> {
        let secs = grace.as_secs().max(1).to_string();
        engine_output(&self.engine, &["stop", "-t", &secs, &self.id]).await?;
        Ok(())
    }

    async fn kill(&self) -> Result<(), BridgeError> {
        if self.exit().is_some() {
            return Ok(());
        }
        engine_output(&self.engine, &["kill", &self.id]).await?;
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        inspect_running(&self.engine, &self.id).await.unwrap_or(false)
    }

    fn verifies_liveness(&self) -> bool {
        true
    }

    async fn cleanup(&self) -> Result<(), BridgeError> {
        engine_output(&self.engine, &["rm", "-f", &self.id]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec() -> LaunchSpec {
        let mut env = BTreeMap::new();
        env.insert("WB_PORT".to_string(), "5002".to_string());
        env.insert("WYZE_EMAIL".to_string(), "user@example.com".to_string());
        LaunchSpec {
            env,
            data_dir: PathBuf::from("/srv/wyze/data"),
            rtsp_port: 8564,
            web_port: 5002,
        }
    }

    #[test]
    fn test_run_args() {
        let runtime = ContainerRuntime::new("docker", "mrlt8/wyze-bridge:latest", "wyze-test");
        let args = runtime.run_args(&spec());

        assert_eq!(&args[..6], ["run", "-d", "--name", "wyze-test", "--restart", "unless-stopped"]);
        assert!(args.windows(2).any(|w| w == ["-p", "8564:8564"]));
        assert!(args.windows(2).any(|w| w == ["-p", "5002:5002"]));
        assert!(args.windows(2).any(|w| w == ["-p", "8561:8561"]));
        assert!(args.windows(2).any(|w| w == ["-v", "/srv/wyze/data:/data"]));
        assert!(args.windows(2).any(|w| w == ["-e", "WYZE_EMAIL=user@example.com"]));
        assert_eq!(args.last().map(String::as_str), Some("mrlt8/wyze-bridge:latest"));
    }

    #[test]
    fn test_data_dir_maps_into_container() {
        let runtime = ContainerRuntime::new("docker", "img", "name");
        assert_eq!(
            runtime.data_dir_for(Path::new("/srv/wyze/data")),
            PathBuf::from("/data")
        );
        assert_eq!(runtime.kind(), RuntimeKind::Container);
    }

    #[tokio::test]
    async fn test_missing_engine_fails_launch() {
        let runtime = ContainerRuntime::new("/nonexistent/docker", "img", "name");
        let result = runtime.launch(&spec()).await;
        assert!(matches!(result, Err(BridgeError::LaunchFailed(_))));
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
