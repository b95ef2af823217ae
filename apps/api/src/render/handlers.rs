use axum::{
    extract::{Multipart, State},
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::info;

use crate::errors::AppError;
use crate::models::profile::{CandidateProfile, ImagePayload};
use crate::render::{TemplateDocument, DOCX_CONTENT_TYPE};
use crate::state::AppState;

/// POST /api/v1/documents/render
/// Multipart: `template` (.docx), `profile` JSON, optional `photo` (data URL text or image file).
pub async fn handle_render(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut template: Option<Bytes> = None;
    let mut profile: Option<CandidateProfile> = None;
    let mut photo: Option<ImagePayload> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "template" => template = Some(field.bytes().await?),
            "profile" => {
                let text = field.text().await?;
                profile = Some(
                    serde_json::from_str(&text)
                        .map_err(|e| AppError::Validation(format!("Invalid profile JSON: {e}")))?,
                );
            }
            "photo" if field.file_name().is_some() => {
                let content_type = field.content_type().unwrap_or("image/png").to_string();
                let bytes = field.bytes().await?;
                if !bytes.is_empty() {
                    photo = Some(ImagePayload::from_bytes(&bytes, &content_type));
                }
            }
            "photo" => {
                let text = field.text().await?;
                photo = Some(ImagePayload::new(text.trim())).filter(|photo| !photo.is_empty());
            }
            _ => {}
        }
    }

    let template = template
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| AppError::Validation("Please upload a template first!".to_string()))?;
    let profile =
        profile.ok_or_else(|| AppError::Validation("Missing 'profile' field".to_string()))?;
    let file_name = profile.document_file_name("docx");
    info!("Rendering {file_name} from a {} byte template", template.len());

    let renderer = state.renderer.clone();
    let document = tokio::task::spawn_blocking(move || {
        renderer.render(&TemplateDocument::from_bytes(template), &profile, photo.as_ref())
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("Render task failed: {e}")))??;

    Ok((
        [
            (header::CONTENT_TYPE, DOCX_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        document,
    )
        .into_response())
}
