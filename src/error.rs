//! Error types for the fallible edges of the service.
//!
//! None of these abort a quiz run: corpus problems surface at startup, store and
//! submission problems are logged or folded into status values by their callers.

use thiserror::Error;

/// Failures while loading the poem corpus.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to read corpus file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse corpus TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Every poem was rejected (or none were supplied).
    #[error("corpus contains no usable poems")]
    Empty,
}

/// Failures while reading or writing a leaderboard board.
#[derive(Debug, Error)]
pub enum LeaderboardError {
    #[error("leaderboard I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("leaderboard serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to persist leaderboard file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Reasons a feedback submission did not reach the backing store.
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("feedback configuration not found")]
    ConfigMissing,

    /// The configuration still carries template values.
    #[error("feedback configuration still contains placeholder values")]
    ConfigPlaceholder,

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("pending queue I/O error: {0}")]
    Queue(#[from] std::io::Error),

    #[error("pending queue persist error: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Request failures surfaced by the HTTP/WebSocket adapter.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown session: {0}")]
    SessionNotFound(uuid::Uuid),

    #[error("unknown difficulty: {0}")]
    UnknownDifficulty(String),

    #[error("feedback text must not be empty")]
    EmptyFeedback,
}

impl ApiError {
    pub fn status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::UnknownDifficulty(_) | ApiError::EmptyFeedback => StatusCode::BAD_REQUEST,
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), axum::Json(body)).into_response()
    }
}
