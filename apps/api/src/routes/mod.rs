pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};

use crate::extraction::handlers as extraction;
use crate::history::handlers as history;
use crate::render::handlers as render;
use crate::state::AppState;

/// Uploaded resumes, templates and photos all travel in request bodies.
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Legacy proxy contract: raw text in, canonical envelope out
        .route("/api/parse-resume", post(extraction::handle_parse_resume))
        // Profiles
        .route("/api/v1/profiles/extract", post(extraction::handle_extract))
        .route("/api/v1/profiles/upload", post(extraction::handle_upload))
        .route("/api/v1/profiles/reconcile", post(extraction::handle_reconcile))
        // Documents
        .route("/api/v1/documents/render", post(render::handle_render))
        // History
        .route(
            "/api/v1/history",
            get(history::handle_list_history).post(history::handle_save_history),
        )
        .route("/api/v1/history/:id", delete(history::handle_delete_history))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::extraction::pipeline::tests::StubCompletion;
    use crate::history::memory::MemoryRepository;
    use crate::history::HistoryStore;
    use crate::render::docx::tests::{body_text, docx, paragraph};
    use crate::render::docx::DocxRenderer;
    use crate::render::TemplateRenderer;

    const RESUME: &str = "John Smith, 5 years experience, Java, AWS. Built payment services and \
                          led a team of four engineers.";
    const PARSED: &str = r#"{"firstName":"John","lastName":"Smith","overallExperience":"5 years","skill1":"Java","skill2":"AWS"}"#;
    const BOUNDARY: &str = "cvtemplate-test-boundary";

    fn app_with(completion: StubCompletion, credential: Option<&str>) -> Router {
        let config = Config {
            openai_api_key: credential.map(str::to_string),
            ..Default::default()
        };
        build_router(AppState {
            config,
            completion: Arc::new(completion),
            renderer: TemplateRenderer::new(Arc::new(DocxRenderer::default())),
            history: HistoryStore::new(Arc::new(MemoryRepository::default())),
        })
    }

    fn app() -> Router {
        app_with(StubCompletion::answering(PARSED), Some("test-key"))
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// `(name, file name, content type, data)` parts.
    fn multipart_request(uri: &str, parts: &[(&str, Option<&str>, &str, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, file_name, content_type, data) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            let disposition = match file_name {
                Some(file) => format!("Content-Disposition: form-data; name=\"{name}\"; filename=\"{file}\"\r\n"),
                None => format!("Content-Disposition: form-data; name=\"{name}\"\r\n"),
            };
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    async fn send_json(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = send(app, request).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send_json(app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_parse_resume_returns_canonical_envelope() {
        let request = json_request("POST", "/api/parse-resume", json!({ "resume_text": RESUME }));
        let (status, body) = send_json(app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"][0]["type"], "text");
        assert_eq!(body["content"][0]["text"], PARSED);
    }

    #[tokio::test]
    async fn test_extract_reconciles_over_existing_profile() {
        let request = json_request(
            "POST",
            "/api/v1/profiles/extract",
            json!({ "resume_text": RESUME, "profile": { "noticePeriod": "30 days" } }),
        );
        let (status, body) = send_json(app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["has_signal"], true);
        assert_eq!(body["profile"]["firstName"], "John");
        assert_eq!(body["profile"]["skill2"], "AWS");
        assert_eq!(body["profile"]["noticePeriod"], "30 days");
    }

    #[tokio::test]
    async fn test_extract_without_credential_is_bad_request() {
        let request = json_request("POST", "/api/v1/profiles/extract", json!({ "resume_text": RESUME }));
        let (status, body) = send_json(app_with(StubCompletion::answering(PARSED), None), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "API key is required");
    }

    #[tokio::test]
    async fn test_extract_passes_upstream_status_through() {
        let request = json_request("POST", "/api/v1/profiles/extract", json!({ "resume_text": RESUME }));
        let (status, _) = send_json(app_with(StubCompletion::rejecting(401), Some("bad")), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_extract_malformed_payload_is_unprocessable() {
        let request = json_request("POST", "/api/v1/profiles/extract", json!({ "resume_text": RESUME }));
        let app = app_with(StubCompletion::answering("Sorry, I cannot help."), Some("key"));
        let (status, body) = send_json(app, request).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["details"], "Sorry, I cannot help.");
    }

    #[tokio::test]
    async fn test_short_resume_is_rejected() {
        let request = json_request("POST", "/api/v1/profiles/extract", json!({ "resume_text": "John" }));
        let (status, _) = send_json(app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_plain_text_resume() {
        let request = multipart_request(
            "/api/v1/profiles/upload",
            &[("resume", Some("resume.txt"), "text/plain", RESUME.as_bytes())],
        );
        let (status, body) = send_json(app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["profile"]["lastName"], "Smith");
    }

    #[tokio::test]
    async fn test_reconcile_is_pure() {
        let request = json_request(
            "POST",
            "/api/v1/profiles/reconcile",
            json!({
                "profile": { "firstName": "Jane" },
                "parsed": { "first_name": "", "overall_experience": "7 years" }
            }),
        );
        let (status, body) = send_json(app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["profile"]["firstName"], "Jane");
        assert_eq!(body["profile"]["overallExperience"], "7 years");
        assert_eq!(body["has_signal"], true);
    }

    #[tokio::test]
    async fn test_render_document() {
        let template = docx(&paragraph("{firstName} {lastName}"));
        let profile = json!({ "firstName": "John", "lastName": "Smith" }).to_string();
        let request = multipart_request(
            "/api/v1/documents/render",
            &[
                ("template", Some("template.docx"), "application/octet-stream", template.as_slice()),
                ("profile", None, "application/json", profile.as_bytes()),
            ],
        );

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains("John_Smith_MSXi_Resume.docx"));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body_text(&bytes).contains("John Smith"));
    }

    #[tokio::test]
    async fn test_render_rejects_non_docx_template() {
        let profile = json!({ "firstName": "John" }).to_string();
        let request = multipart_request(
            "/api/v1/documents/render",
            &[
                ("template", Some("template.docx"), "application/octet-stream", &b"not a zip"[..]),
                ("profile", None, "application/json", profile.as_bytes()),
            ],
        );
        let (status, body) = send_json(app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "TEMPLATE_LOAD_ERROR");
    }

    #[tokio::test]
    async fn test_render_requires_template() {
        let profile = json!({ "firstName": "John" }).to_string();
        let request = multipart_request(
            "/api/v1/documents/render",
            &[("profile", None, "application/json", profile.as_bytes())],
        );
        let (status, _) = send_json(app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_history_lifecycle() {
        let app = app();
        let save = json_request(
            "POST",
            "/api/v1/history",
            json!({ "email": "recruiter@example.com", "profile": { "firstName": "Jane" } }),
        );
        let (status, saved) = send_json(app.clone(), save).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = saved["id"].as_str().unwrap().to_string();

        let list = Request::builder()
            .uri("/api/v1/history?email=recruiter@example.com")
            .body(Body::empty())
            .unwrap();
        let (status, entries) = send_json(app.clone(), list).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(entries[0]["formData"]["firstName"], "Jane");

        let remove = Request::builder()
            .method("DELETE")
            .uri(format!("/api/v1/history/{id}?email=recruiter@example.com"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app.clone(), remove).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let remove_again = Request::builder()
            .method("DELETE")
            .uri(format!("/api/v1/history/{id}?email=recruiter@example.com"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app, remove_again).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_requires_email() {
        let list = Request::builder()
            .uri("/api/v1/history?email=")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app(), list).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
