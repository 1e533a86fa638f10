//! Presail API Gateway
//!
//! The single binary: wires configuration, database, oracle clients and
//! the domain services into an axum router with tracing, CORS and
//! request-id middleware, then serves until SIGINT/SIGTERM.

mod handlers;
mod identity;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use presail_common::{config::AppConfig, db, db::DbPool, embeddings, llm, metrics};
use presail_context::{ConversationStore, Orchestrator};
use presail_ingestion::{FsObjectStore, IngestionPipeline};
use presail_search::{DocumentStore, Retriever, VectorIndex};
use presail_workflow::{AnalyticsAggregator, WorkflowEngine, WorkflowStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub docs: DocumentStore,
    pub pipeline: Arc<IngestionPipeline>,
    pub orchestrator: Arc<Orchestrator>,
    pub engine: WorkflowEngine,
    pub analytics: Arc<AnalyticsAggregator>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(&config);

    info!("Starting Presail gateway v{}", presail_common::VERSION);
    metrics::register_metrics();

    let pool = db::connect(&config.database).await?;
    db::run_migrations(&pool).await?;

    let state = build_state(Arc::new(config), pool)?;
    let port = state.config.server.port;
    let host = state.config.server.host.clone();

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    info!("Listening on {}:{}", host, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Assemble every service behind the handlers from configuration
fn build_state(config: Arc<AppConfig>, pool: DbPool) -> anyhow::Result<AppState> {
    let embedder = embeddings::create_embedder(&config.embedding)?;
    let chat = llm::create_chat_model(&config.generation)?;

    let docs = DocumentStore::new(pool.clone());
    let index = VectorIndex::new(pool.clone(), config.embedding.dimension);
    let blobs = Arc::new(FsObjectStore::new(&config.storage.root)?);

    let pipeline = Arc::new(IngestionPipeline::new(
        docs.clone(),
        index.clone(),
        blobs,
        embedder.clone(),
        config.ingestion.clone(),
    ));

    let retriever = Retriever::new(embedder, index, config.retrieval.clone());
    let orchestrator = Arc::new(Orchestrator::new(
        retriever,
        chat,
        ConversationStore::new(pool.clone()),
        config.generation.clone(),
    ));

    let workflow = WorkflowStore::new(pool.clone());
    let engine = WorkflowEngine::new(workflow.clone());
    let analytics = Arc::new(AnalyticsAggregator::new(workflow, config.analytics.clone()));

    Ok(AppState {
        config,
        db: pool,
        docs,
        pipeline,
        orchestrator,
        engine,
        analytics,
    })
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Document ingestion
        .route("/documents", post(handlers::documents::upload))
        .route("/documents", get(handlers::documents::list))
        .route("/documents/{id}", get(handlers::documents::get))
        .route("/documents/{id}", delete(handlers::documents::remove))
        .route("/documents/{id}/reindex", post(handlers::documents::reindex))
        // Grounded chat
        .route("/chat", post(handlers::chat::chat))
        // Proposal workflow
        .route("/proposals", post(handlers::proposals::create))
        .route("/proposals", get(handlers::proposals::list))
        .route("/proposals/{id}", get(handlers::proposals::get))
        .route("/proposals/{id}/submit", post(handlers::proposals::submit))
        .route("/proposals/{id}/review", post(handlers::proposals::review))
        // Analytics
        .route("/analytics/summary", get(handlers::analytics::summary));

    Router::new()
        .nest("/v1", api_routes)
        // Probes live outside the versioned API
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
