use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("configuration error: {0}")]
    Config(String),
    /// Network, timeout or overloaded-backend failure. The only retryable kind.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("index was built with embedding model '{found}', expected '{expected}'")]
    IndexMismatch { expected: String, found: String },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn transport<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Transport(err.to_string())
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            return ApiError::Transport(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return ApiError::Transport(err.to_string());
            }
        }
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Transport(_) => StatusCode::BAD_GATEWAY,
            ApiError::IndexMismatch { .. } => StatusCode::CONFLICT,
            ApiError::Config(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
