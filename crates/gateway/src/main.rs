//! PropForge API Gateway
//!
//! The main entry point for the chat assistant's context requests.
//! Handles:
//! - Store and engine wiring per configuration
//! - Rate limiting
//! - Request routing
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use propforge_common::{
    config::{AppConfig, ObservabilityConfig},
    db::DbPool,
    embeddings::create_embedder,
    errors::Result,
    metrics,
};
use propforge_context::{spawn_session_sweeper, ContextEngine};
use propforge_search::retrieval::{
    Fixtures, InMemoryRelationalStore, InMemoryVectorStore, PgVectorStore, SqlRelationalStore,
};
use propforge_search::{RelationalStore, VectorStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<ContextEngine>,
    /// Present for the postgres store provider
    pub db: Option<DbPool>,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Configuration decides the log format, so it loads first
    let config = AppConfig::load()?;
    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting PropForge API Gateway v{}",
        propforge_common::VERSION
    );

    config.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;
    let config = Arc::new(config);

    // Initialize metrics
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port)))
        .add_global_label("service", config.observability.service_name.clone())
        .set_buckets(metrics::LATENCY_BUCKETS)?
        .install()?;
    metrics::register_metrics();

    let (vector, relational, db) = build_stores(&config).await?;
    let engine = Arc::new(ContextEngine::new(&config, vector, relational)?);

    let shutdown = CancellationToken::new();
    let sweeper = spawn_session_sweeper(
        engine.sessions().clone(),
        Duration::from_secs(config.memory.sweep_interval_secs),
        shutdown.clone(),
    );

    let state = AppState {
        config: config.clone(),
        engine,
        db,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if tokio::time::timeout(config.shutdown_timeout(), sweeper).await.is_err() {
        warn!("Session sweeper did not stop in time");
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Vector and relational stores for the configured provider
async fn build_stores(
    config: &AppConfig,
) -> Result<(Arc<dyn VectorStore>, Arc<dyn RelationalStore>, Option<DbPool>)> {
    match config.store.provider.as_str() {
        "memory" => {
            let fixtures = match config.store.fixtures_path {
                Some(ref path) => Fixtures::load(path).await?,
                None => Fixtures::default(),
            };
            info!(
                collections = fixtures.collections.len(),
                tables = fixtures.tables.len(),
                "Using in-memory stores"
            );
            Ok((
                Arc::new(InMemoryVectorStore::new(fixtures.collections)),
                Arc::new(InMemoryRelationalStore::new(fixtures.tables)),
                None,
            ))
        }
        _ => {
            info!("Connecting to database...");
            let db = DbPool::new(&config.database).await?;
            let shared = Arc::new(db.clone());
            let embedder = create_embedder(&config.embedding)?;

            let vector = PgVectorStore::new(shared.clone(), embedder, config.store.documents_table.clone())?;
            let relational = SqlRelationalStore::new(shared, config.store.tables.clone());
            Ok((Arc::new(vector), Arc::new(relational), Some(db)))
        }
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let mut api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Context endpoint
        .route("/chat/context", post(handlers::chat::chat_context))

        // Session endpoints
        .route(
            "/sessions/{id}",
            get(handlers::sessions::get_session).delete(handlers::sessions::close_session),
        )
        .route("/sessions/{id}/responses", post(handlers::sessions::record_response))
        .route_layer(axum::middleware::from_fn(middleware::request_metrics::track_requests));

    let limits = &state.config.rate_limit;
    if limits.enabled {
        let limit = middleware::rate_limit::RateLimit::new(limits.requests_per_second, limits.burst);
        api_routes = api_routes.layer(axum::middleware::from_fn_with_state(
            limit,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    let timeout = TimeoutLayer::new(state.config.request_timeout());
    let concurrency = GlobalConcurrencyLimitLayer::new(state.config.server.max_concurrent_requests);

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(timeout)
        .layer(concurrency)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use propforge_search::retrieval::Document;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(config: AppConfig) -> Router {
        let fixtures = Fixtures::default()
            .with_rows(
                "listings",
                vec![json!({
                    "title": "Marina Gate 2BR", "community": "Dubai Marina",
                    "property_type": "apartment", "bedrooms": 2, "price": 2_850_000
                })
                .as_object()
                .cloned()
                .unwrap()],
            )
            .with_documents(
                "neighborhoods",
                vec![Document::new("Dubai Marina has a long waterfront promenade")
                    .with_metadata("community", "Dubai Marina")],
            );

        let engine = ContextEngine::new(
            &config,
            Arc::new(InMemoryVectorStore::new(fixtures.collections)),
            Arc::new(InMemoryRelationalStore::new(fixtures.tables)),
        )
        .unwrap();

        create_router(AppState {
            config: Arc::new(config),
            engine: Arc::new(engine),
            db: None,
        })
    }

    fn chat_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/chat/context")
            .header("content-type", "application/json")
            .header("x-user-role", "Investor")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_chat_context_round() {
        let app = app(AppConfig::default());

        let response = app
            .clone()
            .oneshot(chat_request(json!({
                "session_id": "web-1",
                "message": "Show me 2-bedroom apartments in Dubai Marina under 3M",
                "render": true
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        let body = json_body(response).await;
        assert_eq!(body["prompt"]["analysis"]["primary_intent"], "property_search");
        assert_eq!(body["prompt"]["role"]["role"], "investor");
        assert!(body["rendered"].as_str().unwrap().contains("Marina Gate"));

        let session = app
            .clone()
            .oneshot(Request::builder().uri("/v1/sessions/web-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(session.status(), StatusCode::OK);
        assert_eq!(json_body(session).await["turn_count"], 1);

        let closed = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/v1/sessions/web-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(closed.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let app = app(AppConfig::default());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/v1/sessions/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let reply = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/sessions/nope/responses")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "message": "hi" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(reply.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let response = app(AppConfig::default())
            .oneshot(chat_request(json!({ "session_id": "web-2", "message": "" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rate_limit_applies() {
        let mut config = AppConfig::default();
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        let app = app(config);

        let health = || Request::builder().uri("/v1/health").body(Body::empty()).unwrap();
        assert_eq!(app.clone().oneshot(health()).await.unwrap().status(), StatusCode::OK);
        assert_eq!(
            app.oneshot(health()).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_single_slot_concurrency_releases_permits() {
        let mut config = AppConfig::default();
        config.server.max_concurrent_requests = 1;
        config.server.request_timeout_secs = 1;
        config.rate_limit.enabled = false;
        let app = app(config);

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri("/v1/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_ready_without_database() {
        let response = app(AppConfig::default())
            .oneshot(Request::builder().uri("/v1/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ready");
    }
}
