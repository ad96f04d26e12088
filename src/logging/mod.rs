//! Bridge output persisted to `<data>/logs/bridge.log`, rotated by size.

use chrono::{DateTime, Local, Utc};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::Result;

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024; // 10MB
const LOG_RETENTION_DAYS: i64 = 2;
const LOG_STEM: &str = "bridge";

struct LogFile {
    file: File,
    size: u64,
}

pub struct BridgeLogger {
    log_dir: PathBuf,
    max_size: u64,
    current: Mutex<LogFile>,
}

impl BridgeLogger {
    pub async fn new(log_dir: PathBuf) -> Result<Self> {
        Self::with_max_size(log_dir, MAX_LOG_SIZE).await
    }

    pub async fn with_max_size(log_dir: PathBuf, max_size: u64) -> Result<Self> {
        tokio::fs::create_dir_all(&log_dir).await?;
        Self::cleanup_old_logs(&log_dir).await?;

        let file = open_append(&Self::log_path(&log_dir)).await?;
        let size = file.metadata().await?.len();

        Ok(Self {
            log_dir,
            max_size,
            current: Mutex::new(LogFile { file, size }),
        })
    }

    pub fn path(&self) -> PathBuf {
        Self::log_path(&self.log_dir)
    }

    /// Appends one line tagged with its stream (`stdout`, `stderr`, ...).
    pub async fn write_line(&self, stream: &str, line: &str) -> Result<()> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let entry = format!("[{}] [{}] {}\n", timestamp, stream.to_uppercase(), line);
        let bytes = entry.as_bytes();

        let mut current = self.current.lock().await;

        if current.size > 0 && current.size + bytes.len() as u64 > self.max_size {
            current.file.flush().await?;
            self.rotate().await?;
            current.file = open_append(&self.path()).await?;
            current.size = 0;
        }

        current.file.write_all(bytes).await?;
        current.file.flush().await?;
        current.size += bytes.len() as u64;

        Ok(())
    }

    async fn rotate(&self) -> Result<()> {
        let current_path = self.path();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S%.3f");
        let rotated = self
            .log_dir
            .join(format!("{}.{}.log", LOG_STEM, timestamp));

        if tokio::fs::try_exists(&current_path).await? {
            tokio::fs::rename(&current_path, &rotated).await?;
        }
        Ok(())
    }

    async fn cleanup_old_logs(log_dir: &Path) -> Result<()> {
        let cutoff = Utc::now() - chrono::Duration::days(LOG_RETENTION_DAYS);

        let mut entries = tokio::fs::read_dir(log_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            if let Ok(modified) = metadata.modified() {
                let modified: DateTime<Utc> = modified.into();
                if modified < cutoff {
                    let _ = tokio::fs::remove_file(&path).await;
                    tracing::debug!("Deleted old bridge log: {:?}", path);
                }
            }
        }

        Ok(())
    }

    fn log_path(log_dir: &Path) -> PathBuf {
        log_dir.join(format!("{}.log", LOG_STEM))
    }

    pub async fn flush(&self) -> Result<()> {
        self.current.lock().await.file.flush().await?;
        Ok(())
    }
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}
