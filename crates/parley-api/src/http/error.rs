//! Application error type mapped to HTTP responses.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use parley_types::error::SessionError;

/// Errors a handler can return. Bodies are plain text.
#[derive(Debug)]
pub enum AppError {
    /// The prompt could not be started: no instruction, or the upstream
    /// stream could not be opened.
    Session(SessionError),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        AppError::Session(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Session(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        tracing::error!(status = status.as_u16(), error = %message, "request failed");

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            message,
        )
            .into_response()
    }
}
