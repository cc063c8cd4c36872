use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] relaybot_core::CoreError),

    #[error("task store error: {0}")]
    Scheduler(#[from] relaybot_scheduler::SchedulerError),

    #[error("agent call failed: {0}")]
    Agent(#[from] relaybot_agent::ProviderError),

    #[error("reply delivery failed: {0}")]
    Transport(#[from] relaybot_transport::ChannelError),
}

pub type Result<T> = std::result::Result<T, CommandError>;
