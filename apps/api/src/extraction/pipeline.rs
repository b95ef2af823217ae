//! Extraction pipeline: wires the stages together for one resume.
//!
//! Flow: normalize → complete (one round trip) → extract_payload → parse_json →
//!       reconcile against the caller's profile → has_any_signal.
//!
//! Stateless: the caller owns the profile; nothing is retained between calls.

use serde::Serialize;
use tracing::{info, warn};

use crate::extraction::normalizer::normalize;
use crate::extraction::parser::{extract_payload, parse_json, strip_json_fences};
use crate::extraction::reconciler::{has_any_signal, reconcile};
use crate::extraction::ExtractionError;
use crate::llm_client::{CompletionRequest, CompletionResponse, CompletionService};
use crate::models::profile::CandidateProfile;

/// Result of running the pipeline over one resume.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutcome {
    pub profile: CandidateProfile,
    /// False when the parser returned nothing useful; callers should prompt for manual entry.
    pub has_signal: bool,
    /// The cleaned JSON text the profile was reconciled from.
    pub payload: String,
}

/// Normalizes `raw_text` and requests a completion for it.
pub async fn request_completion(
    completion: &dyn CompletionService,
    credential: Option<&str>,
    raw_text: &str,
    token_budget: usize,
) -> Result<CompletionResponse, ExtractionError> {
    let body = normalize(raw_text, token_budget);
    info!(
        "Requesting extraction: original {} chars, cleaned {} chars",
        raw_text.chars().count(),
        body.chars().count()
    );
    Ok(completion
        .complete(&CompletionRequest::extraction(body), credential)
        .await?)
}

/// Runs the full pipeline and reconciles the result on top of `existing`.
pub async fn extract_profile(
    completion: &dyn CompletionService,
    credential: Option<&str>,
    raw_text: &str,
    existing: &CandidateProfile,
    token_budget: usize,
) -> Result<ExtractionOutcome, ExtractionError> {
    let response = request_completion(completion, credential, raw_text, token_budget).await?;
    apply_response(&response, existing)
}

/// Parses a completion envelope and reconciles it on top of `existing`.
pub fn apply_response(
    response: &CompletionResponse,
    existing: &CandidateProfile,
) -> Result<ExtractionOutcome, ExtractionError> {
    let payload = extract_payload(response.envelope())?;
    let record = parse_json(&payload).inspect_err(|e| {
        warn!("Failed to parse JSON from completion response: {e}");
    })?;

    let profile = reconcile(existing, &record);
    let has_signal = has_any_signal(&record);
    if has_signal {
        info!(
            "Extraction applied: {} employment entries, {} chars of additional details",
            profile.employment_history.len(),
            profile.additional_details.len()
        );
    } else {
        warn!("Parser returned no usable fields; manual entry required");
    }

    Ok(ExtractionOutcome {
        profile,
        has_signal,
        payload: strip_json_fences(&payload).to_string(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    use crate::extraction::parser::PayloadError;
    use crate::llm_client::CompletionError;
    use crate::render::docx::tests::{body_text, docx, paragraph};
    use crate::render::docx::DocxRenderer;
    use crate::render::{TemplateDocument, TemplateRenderer};

    /// Completion stub returning a canned envelope and recording the resume body it saw.
    pub(crate) struct StubCompletion {
        pub response: Result<CompletionResponse, u16>,
        pub seen_body: Mutex<Option<String>>,
    }

    impl StubCompletion {
        pub(crate) fn answering(text: &str) -> Self {
            Self {
                response: Ok(CompletionResponse::from_text(text)),
                seen_body: Mutex::new(None),
            }
        }

        pub(crate) fn rejecting(status: u16) -> Self {
            Self {
                response: Err(status),
                seen_body: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl CompletionService for StubCompletion {
        async fn complete(
            &self,
            request: &CompletionRequest,
            credential: Option<&str>,
        ) -> Result<CompletionResponse, CompletionError> {
            if credential.is_none() {
                return Err(CompletionError::AuthenticationMissing);
            }
            *self.seen_body.lock().unwrap() = Some(request.resume_body().to_string());
            match &self.response {
                Ok(response) => Ok(response.clone()),
                Err(status) => Err(CompletionError::UpstreamRejected {
                    status: *status,
                    body: "rejected".to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_end_to_end_blank_profile() {
        let stub = StubCompletion::answering(
            r#"{"firstName":"John","lastName":"Smith","overallExperience":"5 years","skill1":"Java","skill2":"AWS"}"#,
        );
        let outcome = extract_profile(
            &stub,
            Some("key"),
            "John Smith, 5 years experience, Java, AWS",
            &CandidateProfile::default(),
            8000,
        )
        .await
        .unwrap();

        assert!(outcome.has_signal);
        let expected = CandidateProfile {
            first_name: "John".to_string(),
            last_name: "Smith".to_string(),
            overall_experience: "5 years".to_string(),
            skill1: "Java".to_string(),
            skill2: "AWS".to_string(),
            ..Default::default()
        };
        assert_eq!(outcome.profile, expected);
        assert_eq!(
            stub.seen_body.lock().unwrap().as_deref(),
            Some("John Smith, 5 years experience, Java, AWS")
        );

        let renderer = TemplateRenderer::new(Arc::new(DocxRenderer::default()));
        let template = TemplateDocument::from_bytes(docx(&paragraph("{firstName} {lastName}")));
        let document = renderer.render(&template, &outcome.profile, None).unwrap();
        assert!(body_text(&document).contains("John Smith"));
    }

    #[tokio::test]
    async fn test_resume_body_is_normalized_before_completion() {
        let stub = StubCompletion::answering("{}");
        extract_profile(&stub, Some("key"), "Jane ★ Doe\t\t Rust", &CandidateProfile::default(), 8000)
            .await
            .unwrap();
        assert_eq!(stub.seen_body.lock().unwrap().as_deref(), Some("Jane Doe Rust"));
    }

    #[tokio::test]
    async fn test_fenced_response_reconciles() {
        let stub = StubCompletion::answering("```json\n{\"skill3\":\"Kafka\"}\n```");
        let existing = CandidateProfile {
            first_name: "Jane".to_string(),
            ..Default::default()
        };
        let outcome = extract_profile(&stub, Some("key"), "resume", &existing, 8000)
            .await
            .unwrap();
        assert_eq!(outcome.profile.first_name, "Jane");
        assert_eq!(outcome.profile.skill3, "Kafka");
        assert_eq!(outcome.payload, "{\"skill3\":\"Kafka\"}");
    }

    #[tokio::test]
    async fn test_empty_object_reports_no_signal() {
        let stub = StubCompletion::answering("{\"firstName\":\"\"}");
        let outcome = extract_profile(&stub, Some("key"), "resume", &CandidateProfile::default(), 8000)
            .await
            .unwrap();
        assert!(!outcome.has_signal);
        assert_eq!(outcome.profile, CandidateProfile::default());
    }

    #[tokio::test]
    async fn test_malformed_payload_surfaces() {
        let stub = StubCompletion::answering("I could not read this resume.");
        let err = extract_profile(&stub, Some("key"), "resume", &CandidateProfile::default(), 8000)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::Payload(PayloadError::MalformedPayload { .. })
        ));
    }

    #[tokio::test]
    async fn test_completion_errors_propagate() {
        let stub = StubCompletion::rejecting(500);
        let err = extract_profile(&stub, Some("key"), "resume", &CandidateProfile::default(), 8000)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::Completion(CompletionError::UpstreamRejected { status: 500, .. })
        ));

        let err = extract_profile(&stub, None, "resume", &CandidateProfile::default(), 8000)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::Completion(CompletionError::AuthenticationMissing)
        ));
    }
}
