use thiserror::Error;

/// Crate-wide error taxonomy. Each variant corresponds to one of the
/// retriable/terminal categories a worker task loop needs to branch on;
/// callers match on variant rather than inspecting message strings.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid provider name, missing credentials, out-of-range setting.
    /// Surfaced at worker startup; always fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Meeting id not present in the store. No retry is useful.
    #[error("meeting not found: {0}")]
    NotFound(uuid::Uuid),

    /// Meeting exists but is not in a status that permits the requested
    /// transition.
    #[error("meeting {meeting_id} is in status {current:?}, which does not allow this operation (required: {required})")]
    InvalidState {
        meeting_id: uuid::Uuid,
        current: crate::domain::MeetingStatus,
        required: &'static str,
    },

    /// Throttling response from the object store ("SlowDown" or equivalent).
    /// Retried inside the streaming reader itself.
    #[error("object store throttled the request: {0}")]
    Throttling(String),

    /// Streaming retries were exhausted against object storage or HTTP(S).
    #[error("streaming retries exhausted: {0}")]
    NetworkRetryExhausted(String),

    /// Any other streaming failure.
    #[error("streaming error: {0}")]
    Streaming(String),

    /// Audio decode or chunk-export failure.
    #[error("audio processing failed: {0}")]
    AudioProcessing(String),

    /// Transcription provider failed after its internal retries.
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// Cache or relational store I/O failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// LLM provider failed after its internal retries.
    #[error("llm service error: {0}")]
    LlmService(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
}

impl PipelineError {
    /// Whether the broker should requeue the task that produced this error.
    /// Mirrors the "retriable vs. terminal" split in §7 of the design.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            PipelineError::Configuration(_)
                | PipelineError::NotFound(_)
                | PipelineError::InvalidState { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
