use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lead_quality_api::api_client::HttpTransport;
use lead_quality_api::config::Config;
use lead_quality_api::enrichment::LeadScorer;
use lead_quality_api::handlers::{self, AppState};
use lead_quality_api::rate_limiter::ProviderLimiters;

/// Main entry point for the application.
///
/// Initializes tracing, loads configuration, builds the provider limiters
/// (once, shared by every request and batch worker) and starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_quality_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    config.validate();

    let transport = Arc::new(HttpTransport::new(config.http_timeout)?);
    let limiters = ProviderLimiters::from_config(&config);
    let scorer = Arc::new(LeadScorer::from_config(&config, transport, &limiters));
    tracing::info!(
        "Lead scorer initialized (batch concurrency {})",
        config.batch_concurrency
    );

    let app_state = Arc::new(AppState::new(config.clone(), scorer));

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid governor configuration"))?,
    );

    let protected_routes = Router::new()
        .route("/api/v1/leads/score", post(handlers::score_lead))
        .route("/api/v1/leads/batch", post(handlers::process_batch))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload (batch uploads included)
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
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

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
