use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use relink_core::{CoordinationError, ErrorKind};
use serde_json::json;
use thiserror::Error;

use crate::auth::IdentityError;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("Take a short breather before retrying.")]
    RateLimited,
    #[error("Unknown internal error: {0}")]
    Unknown(String),
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Identity(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));

        (self.as_status_code(), body).into_response()
    }
}

impl From<CoordinationError> for ServerError {
    fn from(value: CoordinationError) -> Self {
        let message = value.to_string();

        match value.kind() {
            ErrorKind::InvalidArgument => Self::InvalidArgument(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Conflict => Self::Conflict(message),
            ErrorKind::Forbidden => Self::Forbidden(message),
            ErrorKind::Internal => {
                error!("Request failed: {}", message);
                Self::Unknown(message)
            }
        }
    }
}
