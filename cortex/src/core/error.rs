use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Any third-party call failure: network, auth, rate limit, bad payload.
    #[error("{service} request failed: {message}")]
    ExternalApi {
        service: &'static str,
        message: String,
    },

    #[error("Invalid input: {0}")]
    Validation(String),

    /// Deliberate skip, not a failure. The cycle logs it and moves on.
    #[error("SEO score {score} is below the minimum of {min}")]
    QualityGateSkip { score: u8, min: u8 },

    #[error("An automation cycle is already in progress")]
    AlreadyRunning,

    #[error("No publishable topic: {0}")]
    NoTopic(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn external(service: &'static str, err: impl std::fmt::Display) -> Self {
        Self::ExternalApi {
            service,
            message: err.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Short machine-friendly tag used in run log entries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExternalApi { .. } => "external_api",
            Self::Validation(_) => "validation",
            Self::QualityGateSkip { .. } => "quality_gate",
            Self::AlreadyRunning => "already_running",
            Self::NoTopic(_) => "no_topic",
            Self::Storage(_) | Self::Io(_) | Self::Json(_) | Self::Task(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
