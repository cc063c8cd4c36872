use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task store is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid trigger {trigger:?}: {reason}")]
    InvalidTrigger { trigger: String, reason: String },

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("agent call failed: {0}")]
    Agent(#[from] relaybot_agent::ProviderError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
