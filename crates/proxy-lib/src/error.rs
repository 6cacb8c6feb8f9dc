// ============================
// proxy-lib/src/error.rs
// ============================
//! Central error type + Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Application error types surfaced by the proxy
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    #[error("Upstream dial failed: {0}")]
    UpstreamDial(String),

    #[error("Upstream connection error: {0}")]
    UpstreamRuntime(String),

    #[error("League mismatch: room is for league {room}, request was for {requested}")]
    LeagueMismatch { room: String, requested: String },

    #[error("Upstream link is not open")]
    NotOpen,

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Room unavailable: {0}")]
    RoomUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidHandshake(_) => StatusCode::BAD_REQUEST,
            AppError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            AppError::LeagueMismatch { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for AppError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        AppError::Internal("Failed to send message".to_string())
    }
}
