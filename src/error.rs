//! Error taxonomy shared by every request handler.
//!
//! Handlers return `ApiResult<T>`; the error half renders as the uniform
//! failure envelope `{statusCode, data: null, errors: [], message, success}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed input, invalid identifiers, ownership violations.
    #[error("{0}")]
    BadRequest(String),
    /// Missing, invalid, expired or revoked credentials.
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    /// Registration with a username or email that is already taken.
    #[error("{0}")]
    Conflict(String),
    /// A store or media operation failed after validation passed.
    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// A write SQLite refused on a `UNIQUE` column becomes `Conflict`; any
    /// other failure stays internal.
    pub fn conflict_on_unique(err: anyhow::Error, message: &str) -> Self {
        let violated = err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<rusqlite::Error>(),
                Some(rusqlite::Error::SqliteFailure(failure, _))
                    if failure.code == rusqlite::ErrorCode::ConstraintViolation
            )
        });
        if violated {
            Self::conflict(message)
        } else {
            err.into()
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope<'a> {
    status_code: u16,
    data: Option<()>,
    errors: Vec<String>,
    message: &'a str,
    success: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Store and media failures carry internal detail; log it, do not echo it.
        let message = match &self {
            Self::Internal(detail) => {
                log::error!("request failed: {detail}");
                "Something went wrong"
            }
            Self::BadRequest(message)
            | Self::Unauthorized(message)
            | Self::NotFound(message)
            | Self::Conflict(message) => message.as_str(),
        };
        let body = ErrorEnvelope {
            status_code: status.as_u16(),
            data: None,
            errors: Vec::new(),
            message,
            success: false,
        };
        (status, Json(body)).into_response()
    }
}
