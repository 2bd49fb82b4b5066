use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NugradeError {
    #[error("Project validation failed: {0}")]
    ProjectValidation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse manifest '{}': {message}", path.display())]
    ManifestParse { path: PathBuf, message: String },

    #[error("Invalid version '{0}'")]
    InvalidVersion(String),

    #[error("Registry request failed: {0}")]
    Registry(String),

    #[error("Repository source error: {0}")]
    Source(String),

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NugradeError>;
