//! HTTP gateway for convrag.
//!
//! Exposes the conversational endpoint, the conversation read/clear
//! endpoints, a single-shot question endpoint and liveness probes.
//!
//! Built on Axum.

pub mod api;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use convrag_agent::ConversationPipeline;
use convrag_config::AppConfig;
use convrag_core::error::Error;
use convrag_core::retrieval::Retriever;
use convrag_memory::{NoopRetriever, SessionStore, VectorIndex};

/// Shared application state for the gateway.
pub struct AppState {
    pub pipeline: Arc<ConversationPipeline>,
}

pub type SharedState = Arc<AppState>;

/// Request body size limit.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    api::routes(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Like [`build_router`], plus a CORS layer when origins are configured.
pub fn build_router_with_cors(state: SharedState, allowed_origins: &[String]) -> Router {
    let router = build_router(state);

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return router;
    }

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    router.layer(cors)
}

/// Wire the pipeline and its collaborators from configuration.
///
/// The session store is created here, once per process.
pub fn build_pipeline(config: &AppConfig) -> Result<ConversationPipeline, Error> {
    let router = convrag_providers::build_from_config(config);
    let provider = router.default().ok_or_else(|| Error::Config {
        message: format!("Provider '{}' is not available", config.default_provider),
    })?;

    let retriever: Arc<dyn Retriever> = match &config.retrieval.index_path {
        Some(path) => Arc::new(VectorIndex::load(
            path,
            Arc::clone(&provider),
            &config.retrieval.embedding_model,
        )?),
        None => {
            warn!("No retrieval.index_path configured, answering without retrieved context");
            Arc::new(NoopRetriever)
        }
    };

    let model = convrag_providers::resolve_model(config);
    info!(
        provider = %config.default_provider,
        model = %model,
        retriever = retriever.name(),
        profile = ?config.profile,
        "Pipeline configured"
    );

    ConversationPipeline::from_config(
        config,
        Arc::new(SessionStore::new()),
        retriever,
        provider,
        model,
    )
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let pipeline = Arc::new(build_pipeline(&config)?);
    let state = Arc::new(AppState { pipeline });
    let app = build_router_with_cors(state, &config.gateway.allowed_origins);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
