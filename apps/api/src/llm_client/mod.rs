// Completion client: the single point of entry for text-completion calls.
//
// ARCHITECTURAL RULE: No other module may call the completion API directly.
// Every call is exactly one round trip; there is no retry at this layer.
//
// Model: gpt-4o-mini (hardcoded)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

use prompts::{build_user_turn, EXTRACTION_INSTRUCTION, RESUME_PARSER_SYSTEM};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
/// The model used for all extraction calls.
pub const MODEL: &str = "gpt-4o-mini";
const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 2000;
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("API key is required")]
    AuthenticationMissing,

    #[error("Upstream rejected the request (status {status}): {body}")]
    UpstreamRejected { status: u16, body: String },

    #[error("Transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelParameters {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            temperature: TEMPERATURE,
            max_output_tokens: MAX_TOKENS,
        }
    }
}

/// An immutable request: the instruction, the normalized resume body and sampling parameters.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    instruction_prompt: String,
    resume_body: String,
    parameters: ModelParameters,
}

impl CompletionRequest {
    /// Builds the standard extraction request for a normalized resume body.
    pub fn extraction(resume_body: impl Into<String>) -> Self {
        Self::new(EXTRACTION_INSTRUCTION, resume_body, ModelParameters::default())
    }

    pub fn new(
        instruction_prompt: impl Into<String>,
        resume_body: impl Into<String>,
        parameters: ModelParameters,
    ) -> Self {
        Self {
            instruction_prompt: instruction_prompt.into(),
            resume_body: resume_body.into(),
            parameters,
        }
    }

    pub fn instruction_prompt(&self) -> &str {
        &self.instruction_prompt
    }

    pub fn resume_body(&self) -> &str {
        &self.resume_body
    }

    pub fn parameters(&self) -> ModelParameters {
        self.parameters
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Response envelope handed to the parser.
///
/// Upstream chat-completion bodies are translated to the canonical
/// `{ "content": [ { "type": "text", "text": ... } ] }` shape; anything else is
/// carried through untouched for the parser to judge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CompletionResponse(Value);

impl CompletionResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(json!({
            "content": [
                { "type": "text", "text": text.into() }
            ]
        }))
    }

    /// Translates a native upstream body into the canonical envelope when possible.
    pub fn from_upstream(native: Value) -> Self {
        match serde_json::from_value::<ChatCompletion>(native.clone()) {
            Ok(completion) => {
                if let Some(usage) = &completion.usage {
                    debug!(
                        "Completion usage: prompt_tokens={}, completion_tokens={}",
                        usage.prompt_tokens, usage.completion_tokens
                    );
                }
                match completion.choices.into_iter().next().and_then(|c| c.message.content) {
                    Some(text) => Self::from_text(text),
                    None => Self(native),
                }
            }
            Err(_) => Self(native),
        }
    }

    pub fn envelope(&self) -> &Value {
        &self.0
    }

    pub fn into_envelope(self) -> Value {
        self.0
    }
}

/// Anything that can answer a completion request. `AppState` carries an
/// `Arc<dyn CompletionService>` so the pipeline can be driven by a stub.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
        credential: Option<&str>,
    ) -> Result<CompletionResponse, CompletionError>;
}

/// HTTP client for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct CompletionClient {
    client: Client,
    base_url: String,
}

impl CompletionClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, CHAT_COMPLETIONS_PATH)
    }
}

#[async_trait]
impl CompletionService for CompletionClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
        credential: Option<&str>,
    ) -> Result<CompletionResponse, CompletionError> {
        let api_key = credential
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(CompletionError::AuthenticationMissing)?;

        let user_turn = build_user_turn(request.resume_body(), request.instruction_prompt());
        let parameters = request.parameters();
        let body = ChatRequest {
            model: MODEL,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: RESUME_PARSER_SYSTEM,
                },
                ChatMessage {
                    role: "user",
                    content: &user_turn,
                },
            ],
            temperature: parameters.temperature,
            max_tokens: parameters.max_output_tokens,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        debug!("Completion API responded with status {status}");

        let text = response.text().await?;

        if !status.is_success() {
            warn!("Completion API returned {status}: {text}");
            return Err(CompletionError::UpstreamRejected {
                status: status.as_u16(),
                body: text,
            });
        }

        debug!("Completion response preview: {}", preview(&text, 200));

        let native = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(CompletionResponse::from_upstream(native))
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat_body(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": content } }
            ],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        })
    }

    #[tokio::test]
    async fn test_complete_translates_to_canonical_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("{\"firstName\":\"A\"}")))
            .expect(1)
            .mount(&server)
            .await;

        let client = CompletionClient::new(server.uri()).unwrap();
        let response = client
            .complete(&CompletionRequest::extraction("John Smith"), Some("test-key"))
            .await
            .unwrap();

        assert_eq!(
            response.envelope(),
            &json!({ "content": [ { "type": "text", "text": "{\"firstName\":\"A\"}" } ] })
        );
        server.verify().await;
    }

    #[tokio::test]
    async fn test_request_body_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("{}")))
            .mount(&server)
            .await;

        let client = CompletionClient::new(format!("{}/", server.uri())).unwrap();
        client
            .complete(&CompletionRequest::extraction("Jane Doe resume"), Some("k"))
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        let body: Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["model"], MODEL);
        assert_eq!(body["max_tokens"], 2000);
        assert!((body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert!(messages[0]["content"].as_str().unwrap().contains("ONLY valid JSON"));
        assert_eq!(messages[1]["role"], "user");
        let user = messages[1]["content"].as_str().unwrap();
        assert!(user.contains("Jane Doe resume"));
        assert!(user.contains("\"employmentHistory\""));
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_network() {
        let server = MockServer::start().await;
        let client = CompletionClient::new(server.uri()).unwrap();

        for credential in [None, Some(""), Some("   ")] {
            let err = client
                .complete(&CompletionRequest::extraction("x"), credential)
                .await
                .unwrap_err();
            assert!(matches!(err, CompletionError::AuthenticationMissing));
        }
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_success_status_is_upstream_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"bad key\"}"))
            .expect(1)
            .mount(&server)
            .await;

        let client = CompletionClient::new(server.uri()).unwrap();
        let err = client
            .complete(&CompletionRequest::extraction("x"), Some("k"))
            .await
            .unwrap_err();

        match err {
            CompletionError::UpstreamRejected { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("bad key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        server.verify().await;
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_failure() {
        let client = CompletionClient::new("http://127.0.0.1:9").unwrap();
        let err = client
            .complete(&CompletionRequest::extraction("x"), Some("k"))
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Transport(_)));
    }

    #[tokio::test]
    async fn test_non_json_success_body_becomes_bare_string() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain answer"))
            .mount(&server)
            .await;

        let client = CompletionClient::new(server.uri()).unwrap();
        let response = client
            .complete(&CompletionRequest::extraction("x"), Some("k"))
            .await
            .unwrap();
        assert_eq!(response.envelope(), &Value::String("plain answer".to_string()));
    }

    #[test]
    fn test_from_upstream_passes_unknown_shapes_through() {
        let native = json!({ "message": { "content": "{}" } });
        assert_eq!(CompletionResponse::from_upstream(native.clone()).envelope(), &native);
    }

    #[test]
    fn test_from_upstream_without_content_keeps_native() {
        let native = json!({ "choices": [ { "message": { "content": null } } ] });
        assert_eq!(CompletionResponse::from_upstream(native.clone()).envelope(), &native);
    }
}
