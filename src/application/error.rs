use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::application::queue::QueueClosed;
use crate::domain::error::DomainError;
use crate::infra::error::InfraError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("upstream failure: {0}")]
    Upstream(#[from] InfraError),
    #[error("{0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Domain(DomainError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Domain(DomainError::DuplicateKey { .. }) => StatusCode::CONFLICT,
            AppError::Domain(DomainError::InvalidQuery { .. }) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> String {
        match self {
            // Domain errors are stated in caller terms and safe to echo.
            AppError::Domain(err) => err.to_string(),
            AppError::Upstream(_) => "upstream dependency failed".to_string(),
            AppError::Unexpected(_) => "unexpected error occurred".to_string(),
        }
    }
}

impl From<QueueClosed> for AppError {
    fn from(err: QueueClosed) -> Self {
        Self::Unexpected(err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(error = %self, status = %status, "request failed");
        }
        let body = ErrorBody {
            error: self.presentation_message(),
        };
        (status, Json(body)).into_response()
    }
}
