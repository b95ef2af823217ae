//! Template rendering: binds a canonical profile into a token-based document template.
//!
//! `TemplateRenderer` builds the flat binding map and hands it to an injected
//! `DocumentRenderer` (the .docx engine by default), so the core never depends on
//! how a particular container format is produced.

pub mod bindings;
pub mod docx;
pub mod handlers;

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::info;

use crate::models::profile::{CandidateProfile, ImagePayload};
use bindings::{build_bindings, Bindings};

pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Guidance appended to render failures: almost always a template naming problem.
pub const PLACEHOLDER_GUIDANCE: &str = "Please ensure your template uses the correct placeholders: \
    {firstName}, {lastName}, {overallExperience}, etc.";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template could not be opened: {0}")]
    TemplateLoad(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Unresolved template tokens: {}", .0.join(", "))]
    UnresolvedTokens(Vec<String>),

    #[error("Invalid image for tag '{tag}': {reason}")]
    InvalidImage { tag: String, reason: String },

    #[error("Tag '{tag}' cannot render a {kind} value")]
    TypeMismatch { tag: String, kind: &'static str },

    #[error("Failed to write output document: {0}")]
    Output(String),
}

/// Read-only template container bytes.
#[derive(Debug, Clone)]
pub struct TemplateDocument {
    bytes: Bytes,
}

impl TemplateDocument {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// A document engine that binds values into a template container.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, template: &TemplateDocument, bindings: &Bindings) -> Result<Vec<u8>, RenderError>;
}

/// Profile → document. Stateless; every call produces a fresh buffer.
#[derive(Clone)]
pub struct TemplateRenderer {
    engine: Arc<dyn DocumentRenderer>,
}

impl TemplateRenderer {
    pub fn new(engine: Arc<dyn DocumentRenderer>) -> Self {
        Self { engine }
    }

    pub fn render(
        &self,
        template: &TemplateDocument,
        profile: &CandidateProfile,
        photo: Option<&ImagePayload>,
    ) -> Result<Vec<u8>, RenderError> {
        let bindings = build_bindings(profile, photo);
        let output = self.engine.render(template, &bindings)?;
        info!(
            "Rendered document for {} {} ({} bytes)",
            profile.first_name,
            profile.last_name,
            output.len()
        );
        Ok(output)
    }
}
