use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::runtime::OutputStream;
use crate::logging::BridgeLogger;

/// Spawns one task per stream that forwards bridge output to tracing and,
/// when present, to the bridge log file.
///
/// Each task ends at EOF, on a read error, or when `drain` is cancelled.
pub fn spawn_drains(
    outputs: Vec<OutputStream>,
    drain: CancellationToken,
    sink: Option<Arc<BridgeLogger>>,
) -> Vec<JoinHandle<()>> {
    outputs
        .into_iter()
        .map(|output| {
            let drain = drain.clone();
            let sink = sink.clone();
            tokio::spawn(drain_stream(output, drain, sink))
        })
        .collect()
}

async fn drain_stream(
    output: OutputStream,
    drain: CancellationToken,
    sink: Option<Arc<BridgeLogger>>,
) {
    let stream = output.name;
    let mut lines = BufReader::new(output.reader).lines();

    loop {
        let line = tokio::select! {
            _ = drain.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                tracing::info!(target: "bridge", stream, "{}", line);
                if let Some(sink) = &sink {
                    if let Err(e) = sink.write_line(stream, &line).await {
                        tracing::debug!("Failed to write bridge log: {}", e);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(stream, "Bridge output read failed: {}", e);
                break;
            }
        }
    }

    if let Some(sink) = &sink {
        let _ = sink.flush().await;
    }
    tracing::trace!(stream, "Bridge output drain finished");
}
