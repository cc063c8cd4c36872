use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Required configuration file missing: {path}")]
    MissingFile { path: String },

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable tag, surfaced by the command surface's `/status`.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::MissingFile { .. } => "MISSING_FILE",
            CoreError::PermissionDenied { .. } => "PERMISSION_DENIED",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
            CoreError::Yaml(_) => "YAML_ERROR",
            CoreError::Io(_) => "IO_ERROR",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
