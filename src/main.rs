use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wyze_bridge_plugin::bridge::create_runtime;
use wyze_bridge_plugin::commands;
use wyze_bridge_plugin::config::{self, RuntimeSettings};
use wyze_bridge_plugin::dispatch::Dispatcher;
use wyze_bridge_plugin::plugin::PluginController;

#[derive(Parser, Debug)]
#[command(name = "wyze-plugin")]
#[command(about = "Wyze camera plugin speaking line-delimited JSON-RPC on stdio", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to runtime settings file (TOML/JSON/YAML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Serve the control protocol on stdin/stdout (default)
    Run,
    /// Print the resolved settings and bridge command, then exit
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout carries protocol responses only
    let (log_writer, _log_guard) = tracing_appender::non_blocking(std::io::stderr());
    let log_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wyze_bridge_plugin={log_level},bridge={log_level}")));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_writer)
        .with_ansi(false);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let settings = load_settings(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Run) {
        Command::Check => {
            commands::run_config_check(&settings)?;
            Ok(())
        }
        Command::Run => run(settings).await,
    }
}

fn load_settings(path: Option<&std::path::Path>) -> anyhow::Result<RuntimeSettings> {
    let settings = match path {
        Some(path) => {
            info!("Loading settings from: {}", path.display());
            config::load_from_path(path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?
        }
        None => config::load_from_env_or_file().context("failed to load settings")?,
    };
    Ok(settings)
}

async fn run(settings: RuntimeSettings) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        runtime = ?settings.runtime,
        "Starting Wyze plugin"
    );

    let runtime = create_runtime(&settings);
    info!("Bridge command: {}", runtime.describe_command());

    let controller = Arc::new(PluginController::new(settings, runtime));
    let dispatcher = Dispatcher::new(controller);

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    if let Err(e) = dispatcher.serve(stdin, stdout, shutdown_signal()).await {
        error!("Control loop failed: {}", e);
        return Err(e).context("control loop failed");
    }

    info!("Wyze plugin exiting");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
