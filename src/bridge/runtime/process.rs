//! Bridge as a local subprocess (`python3 frontend.py` in the bridge checkout).

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use super::{BridgeExit, BridgeHandle, BridgeRuntime, ExitWatch, LaunchSpec, Launched, OutputStream};
use crate::bridge::env;
use crate::config::{RuntimeKind, RuntimeSettings};
use crate::error::BridgeError;

pub struct ProcessRuntime {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ProcessRuntime {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self::new(settings.python.clone(), vec![settings.bridge_script.clone()])
            .with_working_dir(settings.bridge_dir())
    }
}

#[async_trait]
impl BridgeRuntime for ProcessRuntime {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Launched, BridgeError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        for (key, _) in std::env::vars() {
            if env::is_stripped(&key) {
                cmd.env_remove(&key);
            }
        }
        cmd.envs(&spec.env);

        let mut child = cmd.spawn().map_err(|e| {
            BridgeError::LaunchFailed(format!("failed to spawn {}: {}", self.program, e))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| BridgeError::LaunchFailed("failed to get process id".into()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::LaunchFailed("failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::LaunchFailed("failed to capture stderr".into()))?;

        let (exit_tx, exit) = ExitWatch::channel();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(pid, "Failed to wait on bridge process: {}", e);
                    None
                }
            };
            let _ = exit_tx.send(Some(BridgeExit { code }));
        });

        tracing::debug!(pid, program = %self.program, "Spawned bridge process");

        Ok(Launched {
            handle: Arc::new(ProcessHandle { pid, exit }),
            outputs: vec![
                OutputStream {
                    name: "stdout",
                    reader: Box::new(stdout),
                },
                OutputStream {
                    name: "stderr",
                    reader: Box::new(stderr),
                },
            ],
        })
    }

    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Process
    }

    fn describe_command(&self) -> String {
        let mut command = self.program.clone();
        for arg in &self.args {
            command.push(' ');
            command.push_str(arg);
        }
        match &self.working_dir {
            Some(dir) => format!("{} (in {})", command, dir.display()),
            None => command,
        }
    }
}

pub struct ProcessHandle {
    pid: u32,
    exit: ExitWatch,
}

impl ProcessHandle {
    fn signal(&self, sig: Signal) -> Result<(), BridgeError> {
        if self.exit.exited().is_some() {
            return Ok(());
        }
        match signal::kill(Pid::from_raw(self.pid as i32), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(BridgeError::Signal(format!("{} to pid {}: {}", sig, self.pid, e))),
        }
    }
}

#[async_trait]
impl BridgeHandle for ProcessHandle {
    fn describe(&self) -> String {
        format!("pid {}", self.pid)
    }

    fn exit(&self) -> Option<BridgeExit> {
        self.exit.exited()
    }

    async fn wait(&self) -> BridgeExit {
        self.exit.wait().await
    }

    async fn terminate(&self, _grace: Duration) -> Result<(), BridgeError> {
        self.signal(Signal::SIGINT)
    }

    async fn kill(&self) -> Result<(), BridgeError> {
        self.signal(Signal::SIGKILL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn spec() -> LaunchSpec {
        let mut env = BTreeMap::new();
        env.insert("BRIDGE_GREETING".to_string(), "hello".to_string());
        LaunchSpec {
            env,
            data_dir: PathBuf::from("/tmp"),
            rtsp_port: 8564,
            web_port: 5002,
        }
    }

    #[tokio::test]
    async fn test_launch_passes_environment_and_captures_output() {
        let runtime = ProcessRuntime::new(
            "sh",
            vec!["-c".into(), "echo \"$BRIDGE_GREETING\"; echo oops >&2".into()],
        );
        let launched = runtime.launch(&spec()).await.unwrap();

        let mut outputs = launched.outputs.into_iter();
        let stdout = outputs.next().unwrap();
        assert_eq!(stdout.name, "stdout");
        let mut lines = BufReader::new(stdout.reader).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("hello"));

        let stderr = outputs.next().unwrap();
        let mut lines = BufReader::new(stderr.reader).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("oops"));

        assert_eq!(launched.handle.wait().await, BridgeExit { code: Some(0) });
    }

    #[tokio::test]
    async fn test_launch_missing_program_fails() {
        let runtime = ProcessRuntime::new("/nonexistent/bridge-binary", vec![]);
        let result = runtime.launch(&spec()).await;
        assert!(matches!(result, Err(BridgeError::LaunchFailed(_))));
    }

    #[tokio::test]
    async fn test_kill_terminates_process() {
        let runtime = ProcessRuntime::new("sh", vec!["-c".into(), "sleep 30".into()]);
        let launched = runtime.launch(&spec()).await.unwrap();
        assert!(launched.handle.exit().is_none());

        launched.handle.kill().await.unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(5), launched.handle.wait())
            .await
            .expect("process did not exit after SIGKILL");
        assert_eq!(exit.code, None);
        assert!(!launched.handle.is_alive().await);
    }

    #[test]
    fn test_describe_command() {
        let runtime = ProcessRuntime::new("python3", vec!["frontend.py".into()])
            .with_working_dir(PathBuf::from("/opt/bridge"));
        assert_eq!(runtime.describe_command(), "python3 frontend.py (in /opt/bridge)");
    }
}
