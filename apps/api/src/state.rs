use std::sync::Arc;

use crate::config::Config;
use crate::history::HistoryStore;
use crate::llm_client::CompletionService;
use crate::render::TemplateRenderer;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Pluggable completion backend. Default: CompletionClient against OPENAI_BASE_URL.
    pub completion: Arc<dyn CompletionService>,
    pub renderer: TemplateRenderer,
    pub history: HistoryStore,
}
