use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use std::path::Path;

use super::schema::RuntimeSettings;
use crate::error::{ConfigError, Result};

const ENV_PREFIX: &str = "WYZE_PLUGIN_";

pub fn load_from_env_or_file() -> Result<RuntimeSettings> {
    let figment = Figment::from(Serialized::defaults(RuntimeSettings::default()))
        .merge(Toml::file("wyze-plugin.toml"))
        .merge(Json::file("wyze-plugin.json"))
        .merge(Yaml::file("wyze-plugin.yaml"))
        .merge(Yaml::file("wyze-plugin.yml"))
        .merge(Env::prefixed(ENV_PREFIX));

    extract(figment)
}

pub fn load_from_path(path: &Path) -> Result<RuntimeSettings> {
    let base = Figment::from(Serialized::defaults(RuntimeSettings::default()));

    let figment = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => base.merge(Toml::file(path)),
        Some("json") => base.merge(Json::file(path)),
        Some("yaml") | Some("yml") => base.merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(format!(
                "Unsupported settings file format: {}",
                path.display()
            ))
            .into())
        }
    }
    .merge(Env::prefixed(ENV_PREFIX));

    extract(figment)
}

fn extract(figment: Figment) -> Result<RuntimeSettings> {
    let settings: RuntimeSettings = figment
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&settings)?;
    Ok(settings)
}

pub fn validate(settings: &RuntimeSettings) -> Result<()> {
    if settings.startup_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "startup_timeout_secs must be greater than 0".into(),
        )
        .into());
    }

    if settings.stop_grace_secs == 0 {
        return Err(
            ConfigError::Validation("stop_grace_secs must be greater than 0".into()).into(),
        );
    }

    if settings.status_refresh_secs == 0 {
        return Err(ConfigError::Validation(
            "status_refresh_secs must be greater than 0".into(),
        )
        .into());
    }

    if settings.bridge_script.trim().is_empty() {
        return Err(ConfigError::Validation("bridge_script cannot be empty".into()).into());
    }

    Ok(())
}
