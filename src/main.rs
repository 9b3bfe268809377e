use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kommo_lead_scorer::config::Config;
use kommo_lead_scorer::handlers::{self, AppState};
use kommo_lead_scorer::kommo_client::KommoClient;
use kommo_lead_scorer::openai_client::OpenAiClient;
use kommo_lead_scorer::processor::LeadProcessor;
use kommo_lead_scorer::scorer::LeadScorer;

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Kommo and language-model clients.
/// - The lead processor.
/// - HTTP routes and middleware (CORS, Rate Limiting).
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kommo_lead_scorer=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    let kommo_client = KommoClient::new(config.kommo_base_url.clone(), config.kommo_api_key.clone())
        .map_err(|e| anyhow::anyhow!("Failed to initialize Kommo client: {}", e))?;
    tracing::info!("✓ Kommo client initialized: {}", config.kommo_base_url);

    let openai_client = OpenAiClient::new(
        config.openai_base_url.clone(),
        config.openai_api_key.clone(),
        config.openai_model.clone(),
    )
    .map_err(|e| anyhow::anyhow!("Failed to initialize OpenAI client: {}", e))?;
    tracing::info!("✓ Language model client initialized: {}", openai_client.model());

    let processor = LeadProcessor::new(
        Arc::new(kommo_client),
        LeadScorer::new(Arc::new(openai_client)),
    )
    .with_write_pacing(Duration::from_millis(config.write_pacing_ms));

    let port = config.port;
    let app_state = Arc::new(AppState { config, processor });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes = Router::new()
        .route("/api/v1/pipelines", get(handlers::list_pipelines))
        .route(
            "/api/v1/pipelines/:id/statuses",
            get(handlers::list_pipeline_statuses),
        )
        .route(
            "/api/v1/pipelines/:id/leads",
            get(handlers::list_pipeline_leads),
        )
        .route("/api/v1/leads/score", post(handlers::score_leads))
        .route("/api/v1/leads/process", post(handlers::process_leads))
        .route(
            "/api/v1/leads/move-high-score",
            post(handlers::move_high_score_leads),
        )
        .route(
            "/api/v1/leads/scores/summary",
            get(handlers::scores_summary),
        )
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
