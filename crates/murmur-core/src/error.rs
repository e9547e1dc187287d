use thiserror::Error;

#[derive(Debug, Error)]
pub enum MurmurError {
    /// The client connection is gone; the stage writing to it stops.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider error: {0}")]
    Provider(String),

    /// Control-flow signal for a superseded task. Not a failure.
    #[error("Cancellation requested")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MurmurError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Wrap a backend failure, keeping the full `anyhow` context chain.
    pub fn provider(err: impl std::fmt::Display) -> Self {
        Self::Provider(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, MurmurError>;
