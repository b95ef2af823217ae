//! Response parser: pulls the JSON payload out of a completion envelope and decodes it.
//!
//! Envelope shapes are tried in a fixed order; the first whose shape matches
//! supplies the text.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// A decoded extraction payload: string keys to arbitrary JSON values.
pub type RawRecord = Map<String, Value>;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("No text content in completion response")]
    EmptyResponse,

    #[error("Failed to parse resume data from the parser: {reason}")]
    MalformedPayload { raw: String, reason: String },
}

impl PayloadError {
    /// The offending raw text, when there is one.
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            PayloadError::EmptyResponse => None,
            PayloadError::MalformedPayload { raw, .. } => Some(raw),
        }
    }
}

/// Outcome of a single envelope matcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    FoundText(String),
    NotFound,
}

type EnvelopeMatcher = fn(&Value) -> Envelope;

/// Matchers in the order they are tried.
const ENVELOPE_MATCHERS: &[(&str, EnvelopeMatcher)] = &[
    ("content_parts", match_content_parts),
    ("chat_choices", match_chat_choices),
    ("bare_string", match_bare_string),
    ("message", match_message),
];

/// `{ content: [ {type:"text", text}, ... ] }` → text parts joined by newlines.
fn match_content_parts(envelope: &Value) -> Envelope {
    match envelope.get("content").and_then(Value::as_array) {
        Some(parts) => Envelope::FoundText(
            parts
                .iter()
                .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
                .map(|part| part.get("text").and_then(Value::as_str).unwrap_or_default())
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        None => Envelope::NotFound,
    }
}

/// `{ choices: [ { message: { content } } ] }`
fn match_chat_choices(envelope: &Value) -> Envelope {
    envelope
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.pointer("/message/content"))
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .map_or(Envelope::NotFound, |content| Envelope::FoundText(content.to_string()))
}

fn match_bare_string(envelope: &Value) -> Envelope {
    match envelope {
        Value::String(text) => Envelope::FoundText(text.clone()),
        _ => Envelope::NotFound,
    }
}

/// `{ message: { content } }`
fn match_message(envelope: &Value) -> Envelope {
    envelope
        .pointer("/message/content")
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .map_or(Envelope::NotFound, |content| Envelope::FoundText(content.to_string()))
}

/// First matcher that recognises `envelope`, with its label.
fn match_envelope(envelope: &Value) -> Option<(&'static str, String)> {
    ENVELOPE_MATCHERS
        .iter()
        .find_map(|(label, matcher)| match matcher(envelope) {
            Envelope::FoundText(text) => Some((*label, text)),
            Envelope::NotFound => None,
        })
}

/// Returns the trimmed payload text carried by `envelope`.
pub fn extract_payload(envelope: &Value) -> Result<String, PayloadError> {
    let (label, text) = match_envelope(envelope).ok_or(PayloadError::EmptyResponse)?;
    debug!("Completion envelope matched {label} ({} chars)", text.len());

    let text = text.trim();
    if text.is_empty() {
        return Err(PayloadError::EmptyResponse);
    }
    Ok(text.to_string())
}

/// Decodes payload text into a record, stripping code fences first.
pub fn parse_json(text: &str) -> Result<RawRecord, PayloadError> {
    let cleaned = strip_json_fences(text);
    match serde_json::from_str::<Value>(cleaned) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(other) => Err(PayloadError::MalformedPayload {
            raw: cleaned.to_string(),
            reason: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
        Err(e) => Err(PayloadError::MalformedPayload {
            raw: cleaned.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from completion output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let inner = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```JSON"))
        .or_else(|| text.strip_prefix("```"));
    match inner {
        Some(stripped) => {
            let stripped = stripped.trim_start();
            stripped
                .strip_suffix("```")
                .map(str::trim)
                .unwrap_or(stripped)
        }
        None => text.strip_suffix("```").map(str::trim_end).unwrap_or(text),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
