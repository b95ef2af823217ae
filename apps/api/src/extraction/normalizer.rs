//! Text normalizer: cleans raw extracted resume text into a single line and bounds
//! it to a token budget before it is sent to the completion service.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Approximate characters per token used to turn a token budget into a character budget.
pub const CHARS_PER_TOKEN: usize = 4;

/// Default token budget for a resume body.
pub const DEFAULT_TOKEN_BUDGET: usize = 8000;

static RE_DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\s.,;:()\-]").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Cleans `text` and truncates it to `max_token_budget * CHARS_PER_TOKEN` characters.
///
/// Never fails; the result may be empty.
pub fn normalize(text: &str, max_token_budget: usize) -> String {
    let cleaned = clean(text);
    let max_chars = max_token_budget.saturating_mul(CHARS_PER_TOKEN);
    let length = cleaned.chars().count();

    if length <= max_chars {
        return cleaned;
    }

    warn!("Text truncated from {length} to {max_chars} characters");
    cleaned.chars().take(max_chars).collect()
}

/// Replaces disallowed characters and collapses every whitespace run, line breaks
/// included, to one space.
fn clean(text: &str) -> String {
    let text = RE_DISALLOWED.replace_all(text, " ");
    let text = RE_WHITESPACE.replace_all(&text, " ");
    text.trim().to_string()
}
