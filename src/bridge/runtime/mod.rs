use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::watch;

use crate::config::{RuntimeKind, RuntimeSettings};
use crate::error::BridgeError;

pub mod container;
pub mod process;

pub use container::ContainerRuntime;
pub use process::ProcessRuntime;

/// What the supervisor hands a runtime for one launch.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub env: BTreeMap<String, String>,
    pub data_dir: PathBuf,
    pub rtsp_port: u16,
    pub web_port: u16,
}

/// One output channel of a launched bridge, drained line by line.
pub struct OutputStream {
    pub name: &'static str,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

pub struct Launched {
    pub handle: Arc<dyn BridgeHandle>,
    pub outputs: Vec<OutputStream>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeExit {
    pub code: Option<i32>,
}

#[async_trait]
pub trait BridgeRuntime: Send + Sync + 'static {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Launched, BridgeError>;

    fn kind(&self) -> RuntimeKind;

    /// Human-readable launch command, for diagnostics.
    fn describe_command(&self) -> String;

    /// Where the bridge sees the host data directory.
    fn data_dir_for(&self, host_dir: &Path) -> PathBuf {
        host_dir.to_path_buf()
    }
}

/// OS-level handle to a running bridge instance.
#[async_trait]
pub trait BridgeHandle: Send + Sync + 'static {
    /// pid or container id
    fn describe(&self) -> String;

    /// `Some` once the instance has exited.
    fn exit(&self) -> Option<BridgeExit>;

    async fn wait(&self) -> BridgeExit;

    /// Ask for a graceful shutdown. Does not wait for the exit.
    async fn terminate(&self, grace: Duration) -> Result<(), BridgeError>;

    async fn kill(&self) -> Result<(), BridgeError>;

    async fn is_alive(&self) -> bool {
        self.exit().is_none()
    }

    /// True when `is_alive` asks an external authority instead of local bookkeeping.
    fn verifies_liveness(&self) -> bool {
        false
    }

    async fn cleanup(&self) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// Exit notification shared by handles and their waiter task.
#[derive(Clone)]
pub struct ExitWatch {
    rx: watch::Receiver<Option<BridgeExit>>,
}

impl ExitWatch {
    pub fn channel() -> (watch::Sender<Option<BridgeExit>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx })
    }

    pub fn exited(&self) -> Option<BridgeExit> {
        *self.rx.borrow()
    }

    pub async fn wait(&self) -> BridgeExit {
        let mut rx = self.rx.clone();
        loop {
            if let Some(exit) = *rx.borrow_and_update() {
                return exit;
            }
            if rx.changed().await.is_err() {
                // waiter went away without reporting
                let last = *rx.borrow();
                return last.unwrap_or(BridgeExit { code: None });
            }
        }
    }
}

pub fn create_runtime(settings: &RuntimeSettings) -> Arc<dyn BridgeRuntime> {
    match settings.runtime {
        RuntimeKind::Process => Arc::new(ProcessRuntime::from_settings(settings)),
        RuntimeKind::Container => Arc::new(ContainerRuntime::from_settings(settings)),
    }
}
