use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

pub type ArenaResult<T> = Result<T, ArenaError>;

/// Errors surfaced over plain HTTP, before a connection is upgraded.
#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("daily game limit reached; upgrade to premium for unlimited games")]
    UsageLimitReached,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ArenaError {
    fn into_response(self) -> Response {
        let status = match self {
            ArenaError::Unauthorized => StatusCode::UNAUTHORIZED,
            ArenaError::UsageLimitReached => StatusCode::FORBIDDEN,
            ArenaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ArenaError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}
