use anyhow::{Context, Result};

use crate::extraction::normalizer::DEFAULT_TOKEN_BUDGET;
use crate::llm_client::DEFAULT_BASE_URL;
use crate::render::docx::MissingTagPolicy;

/// Application configuration loaded from environment variables.
/// Fails at startup if a numeric variable is malformed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Completion credential. Optional: requests fail with `AuthenticationMissing` without it.
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    /// Profile history goes to Redis when set, to process memory otherwise.
    pub redis_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub max_token_budget: usize,
    /// What the docx renderer does with tags that have no binding.
    pub missing_tag_policy: MissingTagPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            openai_api_key: optional_env("OPENAI_API_KEY"),
            openai_base_url: optional_env("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            redis_url: optional_env("REDIS_URL"),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            max_token_budget: match optional_env("MAX_TOKEN_BUDGET") {
                Some(value) => value
                    .parse::<usize>()
                    .context("MAX_TOKEN_BUDGET must be a positive integer")?,
                None => DEFAULT_TOKEN_BUDGET,
            },
            missing_tag_policy: missing_tag_policy(optional_env("MISSING_TAG_POLICY"))?,
        })
    }

    /// The credential to forward upstream, if any.
    pub fn credential(&self) -> Option<&str> {
        self.openai_api_key.as_deref()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            redis_url: None,
            port: 3001,
            rust_log: "info".to_string(),
            max_token_budget: DEFAULT_TOKEN_BUDGET,
            missing_tag_policy: MissingTagPolicy::default(),
        }
    }
}

/// Unset and blank values are both treated as absent.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// `keep` (default), `blank` or `fail`, case-insensitive.
fn missing_tag_policy(value: Option<String>) -> Result<MissingTagPolicy> {
    match value {
        Some(value) => value
            .parse()
            .map_err(anyhow::Error::msg)
            .context("MISSING_TAG_POLICY is invalid"),
        None => Ok(MissingTagPolicy::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tag_policy_defaults_to_keep() {
        assert_eq!(missing_tag_policy(None).unwrap(), MissingTagPolicy::Keep);
        assert_eq!(Config::default().missing_tag_policy, MissingTagPolicy::Keep);
    }

    #[test]
    fn test_missing_tag_policy_parses_case_insensitively() {
        assert_eq!(
            missing_tag_policy(Some("Blank".to_string())).unwrap(),
            MissingTagPolicy::Blank
        );
        assert_eq!(
            missing_tag_policy(Some(" FAIL ".to_string())).unwrap(),
            MissingTagPolicy::Fail
        );
    }

    #[test]
    fn test_unknown_missing_tag_policy_is_rejected() {
        let err = missing_tag_policy(Some("drop".to_string())).unwrap_err();
        assert!(format!("{err:#}").contains("MISSING_TAG_POLICY"));
    }
}
