use crate::services::callbacks::CallbackError;
use crate::services::moderation::ModerationError;
use crate::services::queue::QueueError;
use crate::utils::validation::ValidationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        match e.code {
            "FILE_TOO_LARGE" | "IMAGE_TOO_LARGE" => AppError::PayloadTooLarge(e.to_string()),
            _ => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<ModerationError> for AppError {
    fn from(e: ModerationError) -> Self {
        match e {
            ModerationError::Validation(v) => v.into(),
            ModerationError::Storage(e) => AppError::Internal(e.to_string()),
            ModerationError::Provider(e) => AppError::Internal(e.to_string()),
            ModerationError::Persistence(e) => AppError::Database(e),
        }
    }
}

impl From<CallbackError> for AppError {
    fn from(e: CallbackError) -> Self {
        match e {
            CallbackError::NotFound(batch) => AppError::NotFound(format!("batch {}", batch)),
            CallbackError::Conflict(msg) => AppError::Conflict(msg),
            CallbackError::Persistence(e) => AppError::Database(e),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::NotFound(id) => AppError::NotFound(id),
            QueueError::Conflict(msg) => AppError::Conflict(msg),
            QueueError::InvalidVerdict(msg) => AppError::BadRequest(msg),
            QueueError::Image(msg) => AppError::Internal(msg),
            QueueError::Storage(e) => AppError::Internal(e.to_string()),
            QueueError::Persistence(e) => AppError::Database(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::Anyhow(e) => {
                tracing::error!("Anyhow error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
