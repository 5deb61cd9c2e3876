use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::config::ERROR_MESSAGE_LIMIT;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed request input: empty URL, bad format flag, missing id list.
    #[error("{0}")]
    Validation(String),

    /// The metadata extractor could not resolve the URL.
    #[error("{0}")]
    Extraction(String),

    /// A single item failed to download. Never surfaced over HTTP.
    #[error("{0}")]
    Download(String),

    #[error("{0}")]
    NotFound(String),

    /// Request is valid but the session is not in a state to serve it.
    #[error("{0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) | EngineError::Extraction(_) | EngineError::State(_) => {
                StatusCode::BAD_REQUEST
            }
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Download(_) | EngineError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = truncate_chars(&self.to_string(), ERROR_MESSAGE_LIMIT);
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Cut `text` to at most `limit` characters without splitting a code point.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
