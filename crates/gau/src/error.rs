use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use gau_core::{AdapterError, JwtError, ProviderError, ProviderErrorKind};

/// HTTP-boundary error: a status code plus a small stable message that is
/// safe to return to clients.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<JwtError> for AppError {
    fn from(value: JwtError) -> Self {
        AppError::internal(value.to_string())
    }
}

impl From<AdapterError> for AppError {
    fn from(value: AdapterError) -> Self {
        AppError::internal(value.to_string())
    }
}

impl From<ProviderError> for AppError {
    fn from(value: ProviderError) -> Self {
        let status = match value.kind() {
            ProviderErrorKind::Authorization => StatusCode::UNAUTHORIZED,
            ProviderErrorKind::Configuration | ProviderErrorKind::Unsupported => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProviderErrorKind::Transport | ProviderErrorKind::InvalidResponse => {
                StatusCode::BAD_GATEWAY
            }
        };
        AppError::new(status, value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(value: url::ParseError) -> Self {
        AppError::bad_request(value.to_string())
    }
}
