#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited")]
    RateLimited,

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("SSE parse error: {0}")]
    SseParse(String),

    #[error("embedding count mismatch: sent {sent}, got {got}")]
    EmbeddingMismatch { sent: usize, got: usize },

    #[error("embedding response shape not recognized")]
    EmbeddingShape,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;
