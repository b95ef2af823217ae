use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::history::HistoryEntry;
use crate::models::profile::{CandidateProfile, ImagePayload};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

#[derive(Deserialize)]
pub struct SaveHistoryRequest {
    pub email: String,
    pub profile: CandidateProfile,
    #[serde(default)]
    pub photo: Option<ImagePayload>,
}

fn require_email(email: &str) -> Result<&str, AppError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("A valid email is required".to_string()));
    }
    Ok(email)
}

/// GET /api/v1/history?email=
pub async fn handle_list_history(
    State(state): State<AppState>,
    Query(params): Query<EmailQuery>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    let email = require_email(&params.email)?;
    let entries = state.history.list(email).await.map_err(AppError::Storage)?;
    Ok(Json(entries))
}

/// POST /api/v1/history
pub async fn handle_save_history(
    State(state): State<AppState>,
    Json(req): Json<SaveHistoryRequest>,
) -> Result<(StatusCode, Json<HistoryEntry>), AppError> {
    let email = require_email(&req.email)?;
    let photo = req.photo.filter(|photo| !photo.is_empty());
    let entry = state
        .history
        .save(email, req.profile, photo)
        .await
        .map_err(AppError::Storage)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// DELETE /api/v1/history/:id?email=
pub async fn handle_delete_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<EmailQuery>,
) -> Result<StatusCode, AppError> {
    let email = require_email(&params.email)?;
    let removed = state
        .history
        .delete(email, id)
        .await
        .map_err(AppError::Storage)?;
    if !removed {
        return Err(AppError::NotFound(format!("History entry {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}
