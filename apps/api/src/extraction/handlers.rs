use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::extraction::documents::extract_text;
use crate::extraction::parser::RawRecord;
use crate::extraction::pipeline::{extract_profile, request_completion, ExtractionOutcome};
use crate::extraction::reconciler::{has_any_signal, reconcile};
use crate::models::profile::CandidateProfile;
use crate::state::AppState;

/// Texts shorter than this carry nothing a parser can work with.
const MIN_RESUME_CHARS: usize = 50;
/// Hard cap applied before normalization.
const MAX_RESUME_CHARS: usize = 50_000;
/// Marker of the instruction part in the legacy proxy request.
const LEGACY_INSTRUCTION_MARKER: &str = "Extract the following";

#[derive(Deserialize)]
pub struct ParseResumeRequest {
    #[serde(default, alias = "resumeText")]
    pub resume_text: Option<String>,
    /// Legacy proxy shape: `[{content: [{type: "text", text}, ...]}]`.
    #[serde(default)]
    pub messages: Vec<ProxyMessage>,
}

#[derive(Deserialize)]
pub struct ProxyMessage {
    #[serde(default)]
    pub content: Vec<ProxyContent>,
}

#[derive(Deserialize)]
pub struct ProxyContent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl ParseResumeRequest {
    /// The resume text, from `resume_text` or the first non-instruction text part.
    fn resume_text(&self) -> Option<&str> {
        self.resume_text.as_deref().or_else(|| {
            self.messages
                .first()?
                .content
                .iter()
                .filter(|part| part.kind == "text")
                .filter_map(|part| part.text.as_deref())
                .find(|text| !text.contains(LEGACY_INSTRUCTION_MARKER))
        })
    }
}

#[derive(Deserialize)]
pub struct ExtractRequest {
    #[serde(alias = "resumeText")]
    pub resume_text: String,
    #[serde(default)]
    pub profile: Option<CandidateProfile>,
}

#[derive(Deserialize)]
pub struct ReconcileRequest {
    #[serde(default)]
    pub profile: Option<CandidateProfile>,
    pub parsed: RawRecord,
}

#[derive(Serialize)]
pub struct ReconcileResponse {
    pub profile: CandidateProfile,
    pub has_signal: bool,
}

/// Collapses whitespace, rejects near-empty text and caps oversized text.
fn prepare_resume_text(raw: &str) -> Result<String, AppError> {
    let meaningful = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if meaningful.chars().count() < MIN_RESUME_CHARS {
        return Err(AppError::Validation(
            "Could not extract meaningful text from the document. Please ensure the file is not \
             corrupted or password-protected."
                .to_string(),
        ));
    }

    let length = meaningful.chars().count();
    if length > MAX_RESUME_CHARS {
        warn!("Resume truncated from {length} to {MAX_RESUME_CHARS} chars");
        return Ok(meaningful.chars().take(MAX_RESUME_CHARS).collect());
    }
    Ok(meaningful)
}

/// POST /api/parse-resume
/// Returns the canonical `{content: [{type: "text", text}]}` envelope.
pub async fn handle_parse_resume(
    State(state): State<AppState>,
    Json(req): Json<ParseResumeRequest>,
) -> Result<Json<Value>, AppError> {
    let text = prepare_resume_text(req.resume_text().unwrap_or_default())?;
    let response = request_completion(
        state.completion.as_ref(),
        state.config.credential(),
        &text,
        state.config.max_token_budget,
    )
    .await?;
    Ok(Json(response.into_envelope()))
}

/// POST /api/v1/profiles/extract
pub async fn handle_extract(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> Result<Json<ExtractionOutcome>, AppError> {
    let text = prepare_resume_text(&req.resume_text)?;
    let existing = req.profile.unwrap_or_default();
    let outcome = extract_profile(
        state.completion.as_ref(),
        state.config.credential(),
        &text,
        &existing,
        state.config.max_token_budget,
    )
    .await?;
    Ok(Json(outcome))
}

/// POST /api/v1/profiles/upload
/// Multipart: `resume` file, optional `profile` JSON.
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ExtractionOutcome>, AppError> {
    let mut upload = None;
    let mut existing = CandidateProfile::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "resume" => {
                let file_name = field.file_name().unwrap_or("resume").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                upload = Some((file_name, content_type, bytes));
            }
            "profile" => {
                let text = field.text().await?;
                existing = serde_json::from_str(&text)
                    .map_err(|e| AppError::Validation(format!("Invalid profile JSON: {e}")))?;
            }
            _ => {}
        }
    }

    let (file_name, content_type, bytes) =
        upload.ok_or_else(|| AppError::Validation("Missing 'resume' file".to_string()))?;
    info!("Received upload '{file_name}' ({} bytes)", bytes.len());

    let raw = tokio::task::spawn_blocking(move || {
        extract_text(&file_name, content_type.as_deref(), &bytes)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("Upload decoding task failed: {e}")))??;

    let text = prepare_resume_text(&raw)?;
    let outcome = extract_profile(
        state.completion.as_ref(),
        state.config.credential(),
        &text,
        &existing,
        state.config.max_token_budget,
    )
    .await?;
    Ok(Json(outcome))
}

/// POST /api/v1/profiles/reconcile
pub async fn handle_reconcile(Json(req): Json<ReconcileRequest>) -> Json<ReconcileResponse> {
    let existing = req.profile.unwrap_or_default();
    Json(ReconcileResponse {
        profile: reconcile(&existing, &req.parsed),
        has_signal: has_any_signal(&req.parsed),
    })
}
