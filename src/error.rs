use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,
    #[error("failed authentication")]
    AuthenticationFailure,
    #[error("validation failed: {0}")]
    ValidationFailure(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("infrastructure failure: {0}")]
    InfraFailure(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("status api error: {0}")]
    StatusApi(#[from] reqwest::Error),
    #[error("encoding failure: {0}")]
    EncodingFailure(String),
}

/// JSON body returned for every API response that only carries a message.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageBody {
    pub message: String,
}

impl AppError {
    /// Infra failures are transient: the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::InfraFailure(_) | AppError::Db(_) | AppError::StatusApi(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::AuthenticationFailure => StatusCode::UNAUTHORIZED,
            AppError::ValidationFailure(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InfraFailure(_) | AppError::Db(_) | AppError::StatusApi(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::EncodingFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to a caller. Authentication, infra and
    /// encoding failures never carry internal detail.
    pub fn public_message(&self) -> String {
        match self {
            AppError::NotFound => "not found".into(),
            AppError::AuthenticationFailure => "failed authentication".into(),
            AppError::ValidationFailure(detail) | AppError::Forbidden(detail) => detail.clone(),
            AppError::InfraFailure(_) | AppError::Db(_) | AppError::StatusApi(_) => {
                "backend unavailable; retry later".into()
            }
            AppError::EncodingFailure(_) => "internal data error".into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::AuthenticationFailure
            | AppError::ValidationFailure(_)
            | AppError::Forbidden(_)
            | AppError::NotFound => tracing::warn!(error = %self, "request rejected"),
            _ => tracing::error!(?self, "request failed"),
        }
        let body = MessageBody {
            message: self.public_message(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
