use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("temp file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transcription failed: {0}")]
    Provider(#[from] relaybot_agent::ProviderError),

    #[error("media task had no source URL")]
    NoUrl,

    #[error("task timed out")]
    Timeout,
}
