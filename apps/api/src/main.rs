mod config;
mod errors;
mod extraction;
mod history;
mod llm_client;
mod models;
mod render;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::config::Config;
use crate::history::memory::MemoryRepository;
use crate::history::redis_store::RedisRepository;
use crate::history::{HistoryStore, ProfileRepository};
use crate::llm_client::CompletionClient;
use crate::render::docx::{DocxRenderer, RenderOptions};
use crate::render::TemplateRenderer;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on malformed numeric env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CV template API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize completion client
    let completion = Arc::new(CompletionClient::new(config.openai_base_url.clone())?);
    info!(
        "Completion client initialized (model: {}, base: {})",
        llm_client::MODEL,
        config.openai_base_url
    );
    if config.openai_api_key.is_none() {
        info!("OPENAI_API_KEY is not set; extraction requests will be rejected");
    }

    // Initialize history storage (Redis when configured, memory otherwise)
    let repository: Arc<dyn ProfileRepository> = match &config.redis_url {
        Some(url) => {
            info!("Profile history backed by Redis");
            Arc::new(RedisRepository::open(url)?)
        }
        None => {
            info!("Profile history kept in memory");
            Arc::new(MemoryRepository::default())
        }
    };

    let renderer = DocxRenderer::new(RenderOptions {
        missing_tags: config.missing_tag_policy,
        ..Default::default()
    });
    info!("Docx renderer ready (missing tags: {:?})", config.missing_tag_policy);

    // Build app state
    let state = AppState {
        config: config.clone(),
        completion,
        renderer: TemplateRenderer::new(Arc::new(renderer)),
        history: HistoryStore::new(repository),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
