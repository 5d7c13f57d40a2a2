use std::path::Path;

use crate::config::schema::StoreConfig;
use crate::error::ConfigError;

/// Serialization format of a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Picks the format from a file extension; anything but `.json` is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<StoreConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content, ConfigFormat::from_path(path))
}

pub fn load_config_from_str(
    content: &str,
    format: ConfigFormat,
) -> Result<StoreConfig, ConfigError> {
    let config: StoreConfig = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
    };

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.busy_timeout_ms == 0 {
        return Err(ConfigError::Validation {
            message: "busy_timeout_ms must be greater than zero".to_string(),
        });
    }

    if config.database_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "database_path must not be empty".to_string(),
        });
    }

    Ok(())
}
