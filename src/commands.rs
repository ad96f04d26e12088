use tracing::{error, info, warn};

use crate::bridge::create_runtime;
use crate::config::{self, RuntimeKind, RuntimeSettings};
use crate::error::{ConfigError, Result};

/// Prints the resolved runtime settings and the bridge launch command.
pub fn run_config_check(settings: &RuntimeSettings) -> Result<()> {
    info!("Checking runtime settings...");
    config::validate(settings)?;
    info!("✓ Settings are valid");

    info!("  Plugin dir: {}", settings.plugin_dir.display());
    info!("  Runtime: {:?}", settings.runtime);
    info!("  Data dir: {}", settings.data_dir(None).display());
    info!("  Startup timeout: {}s", settings.startup_timeout_secs);
    info!("  Stop grace: {}s", settings.stop_grace_secs);
    info!("  Status refresh: {}s", settings.status_refresh_secs);
    info!("  Bridge log file: {}", settings.bridge_log_file);

    let runtime = create_runtime(settings);
    info!("  Bridge command: {}", runtime.describe_command());

    match settings.runtime {
        RuntimeKind::Process => {
            let script = settings.bridge_dir().join(&settings.bridge_script);
            if !script.is_file() {
                error!("✗ Bridge script not found: {}", script.display());
                return Err(ConfigError::Validation(format!(
                    "bridge script not found: {}",
                    script.display()
                ))
                .into());
            }
            info!("✓ Bridge script found");

            if !settings.plugin_dir.join("mediamtx.yml").is_file() {
                warn!("  ! No mediamtx.yml in plugin dir, the bridge default is used");
            }
        }
        RuntimeKind::Container => {
            info!("  Image: {}", settings.container_image);
            info!("  Container name: {}", settings.container_name);
        }
    }

    info!("\n✓ All checks passed");
    Ok(())
}
