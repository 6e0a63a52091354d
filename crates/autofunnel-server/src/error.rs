use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use autofunnel_core::error::JourneyError;
use autofunnel_tracking::conversions::ConversionError;

/// Application-level errors that map directly to HTTP responses.
///
/// Every variant implements [`IntoResponse`] so Axum handlers can use
/// `Result<impl IntoResponse, AppError>` as their return type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("validation error on {field:?}: {message}")]
    Unprocessable {
        field: Option<&'static str>,
        message: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

impl AppError {
    pub fn unprocessable(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Unprocessable {
            field: Some(field),
            message: message.into(),
        }
    }
}

impl From<JourneyError> for AppError {
    fn from(e: JourneyError) -> Self {
        match e {
            JourneyError::Validation { field, message } => AppError::Unprocessable {
                field: Some(field),
                message,
            },
            JourneyError::InvalidTransition { .. } | JourneyError::NotToggleable(_) => {
                AppError::Conflict(e.to_string())
            }
            JourneyError::InvalidStoredValue { .. } => AppError::Internal(e.into()),
        }
    }
}

/// Store calls return `anyhow::Error`; typed journey failures inside it keep
/// their own status code.
impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<JourneyError>() {
            Ok(journey_error) => journey_error.into(),
            Err(e) => AppError::Internal(e),
        }
    }
}

impl From<ConversionError> for AppError {
    fn from(e: ConversionError) -> Self {
        match e {
            ConversionError::UnknownPreset(_) => AppError::NotFound(e.to_string()),
            ConversionError::MissingField(field) => AppError::Unprocessable {
                field: Some(field),
                message: e.to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, field) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
                None,
            ),
            AppError::Unprocessable { field, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                message.clone(),
                *field,
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                "invalid_transition",
                msg.clone(),
                None,
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message,
                    "field": field
                }
            })),
        )
            .into_response()
    }
}
