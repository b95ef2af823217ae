use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::extraction::documents::DocumentError;
use crate::extraction::parser::PayloadError;
use crate::extraction::ExtractionError;
use crate::llm_client::CompletionError;
use crate::render::{RenderError, PLACEHOLDER_GUIDANCE};

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Storage error: {0}")]
    Storage(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ExtractionError> for AppError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::Completion(e) => AppError::Completion(e),
            ExtractionError::Payload(e) => AppError::Payload(e),
        }
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::Validation(format!("Invalid multipart body: {}", err.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone(), None)
            }
            AppError::Completion(CompletionError::AuthenticationMissing) => (
                StatusCode::BAD_REQUEST,
                "AUTHENTICATION_MISSING",
                "API key is required".to_string(),
                None,
            ),
            AppError::Completion(CompletionError::UpstreamRejected { status, body }) => {
                tracing::warn!("Upstream rejected completion request with status {status}");
                (
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                    "UPSTREAM_REJECTED",
                    format!("Upstream service rejected the request (status {status})"),
                    Some(serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.clone()))),
                )
            }
            AppError::Completion(CompletionError::Transport(e)) => {
                tracing::error!("Completion transport error: {e}");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_UNAVAILABLE",
                    "Failed to reach the completion service".to_string(),
                    None,
                )
            }
            AppError::Payload(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNPARSEABLE_RESPONSE",
                format!("Could not parse the AI response: {e}"),
                e.raw_text().map(|raw| Value::String(raw.to_string())),
            ),
            AppError::Render(e @ RenderError::TemplateLoad(_)) => (
                StatusCode::BAD_REQUEST,
                "TEMPLATE_LOAD_ERROR",
                e.to_string(),
                None,
            ),
            AppError::Render(e @ RenderError::Output(_)) => {
                tracing::error!("Render output error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "RENDER_OUTPUT_ERROR",
                    "Failed to produce the document".to_string(),
                    None,
                )
            }
            AppError::Render(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "TEMPLATE_ERROR",
                format!("{e}. {PLACEHOLDER_GUIDANCE}"),
                None,
            ),
            AppError::Storage(e) => {
                tracing::error!("Storage error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                    None,
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                    None,
                )
            }
        };

        let mut error = json!({
            "code": code,
            "message": message
        });
        if let Some(details) = details {
            error["details"] = details;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}
