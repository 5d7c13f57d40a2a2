use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DlStoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl DlStoreError {
    /// Returns true when retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DlStoreError::Database(e) => e.is_retryable(),
            DlStoreError::Config(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

pub type Result<T> = std::result::Result<T, DlStoreError>;
