use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("store call timed out")]
    StoreTimeout,
    #[error("quota exceeded")]
    QuotaExceeded { reset_at: DateTime<Utc> },
    #[error("rate limited")]
    RateLimited { retry_after: Duration },
    #[error("unknown service type: {0}")]
    InvalidServiceType(String),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Message(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Db(_) | AppError::StoreTimeout | AppError::Message(_) => {
                tracing::error!(?self)
            }
            _ => tracing::debug!(?self),
        }
        match self {
            AppError::QuotaExceeded { reset_at } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "quota exceeded", "reset_at": reset_at })),
            )
                .into_response(),
            AppError::RateLimited { retry_after } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, secs.to_string())],
                    Json(json!({ "error": "rate limited", "retry_after_secs": secs })),
                )
                    .into_response()
            }
            // Storage failures are fail-closed and must not leak driver detail
            // to callers; the full error goes to the log above.
            AppError::Db(_) | AppError::StoreTimeout => (
                StatusCode::SERVICE_UNAVAILABLE,
                "store unavailable, retry later",
            )
                .into_response(),
            other => {
                let status = match other {
                    AppError::NotFound => StatusCode::NOT_FOUND,
                    AppError::Unauthorized => StatusCode::UNAUTHORIZED,
                    AppError::Forbidden => StatusCode::FORBIDDEN,
                    AppError::InvalidServiceType(_) | AppError::BadRequest(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, other.to_string()).into_response()
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
