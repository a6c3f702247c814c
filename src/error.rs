//! Error types for the dispatch agent.

use thiserror::Error;

/// Errors that represent a genuine fault in the agent's own operation —
/// I/O, malformed data, misconfiguration. Job-level results (UNAVAILABLE /
/// FAILED / COMPLETED) are `JobOutcome`, not `AgentError`: the engine being
/// down is an expected, frequent branch, not an exceptional one.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("storage backend '{0}' not configured")]
    StorageBackendMissing(String),

    #[error("storage upload failed: {0}")]
    StorageUpload(String),

    #[error("no storage backend configured")]
    NoStorageConfigured,

    #[error("engine returned malformed response: {0}")]
    MalformedEngineResponse(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// True for HTTP status codes that are worth retrying: 408, 429, 5xx.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

/// Best-effort classification of an error as "the engine/connection is
/// down" versus "something else is wrong". This is
/// the single most load-bearing judgment call in the Workflow Processor:
/// it decides UNAVAILABLE (retry later, no status update) vs FAILED
/// (durable failure, reported to the producer).
pub fn looks_like_connection_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["connection", "refused", "websocket", "timeout", "not available"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_status_codes() {
        assert!(is_retryable_status(408));
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn connection_error_classification() {
        assert!(looks_like_connection_error("Connection refused (os error 111)"));
        assert!(looks_like_connection_error("engine not available"));
        assert!(looks_like_connection_error("WebSocket closed unexpectedly"));
        assert!(!looks_like_connection_error("graph validation failed: missing node 3"));
    }
}
