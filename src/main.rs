//! visionguard - Safety Violation Lifecycle Server
//!
//! Main entry point.

use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use visionguard::device_registry::DeviceRegistry;
use visionguard::event_log::EventRepository;
use visionguard::evidence::{EvidenceOrchestrator, EvidenceRepository};
use visionguard::ingest::IngestionFacade;
use visionguard::schema::init_schema;
use visionguard::state::{AppConfig, AppState};
use visionguard::stream_session::{StreamSessionLifecycle, StreamSessionRepository};
use visionguard::video_service::{HttpVideoService, VideoService};
use visionguard::violation::{ViolationAggregator, ViolationRepository, ViolationStateMachine};
use visionguard::web_api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "visionguard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting visionguard v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        video_service_url = %config.video_service_url,
        evidence_refresh_secs = config.evidence_refresh_secs,
        "Configuration loaded"
    );

    // Create database pool and apply schema
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;
    init_schema(&pool).await?;
    tracing::info!("Database connected");

    // External video service client
    let video: Arc<dyn VideoService> =
        Arc::new(HttpVideoService::new(config.video_service_url.clone()));

    // Repositories
    let devices = DeviceRegistry::new(pool.clone());
    let events = EventRepository::new(pool.clone());
    let violations = ViolationRepository::new(pool.clone());
    let session_repo = StreamSessionRepository::new(pool.clone());

    // Services
    let state_machine = ViolationStateMachine::new(pool.clone());
    let sessions = Arc::new(StreamSessionLifecycle::new(
        session_repo.clone(),
        video.clone(),
    ));
    let evidence = Arc::new(EvidenceOrchestrator::new(
        EvidenceRepository::new(pool.clone()),
        violations.clone(),
        session_repo.clone(),
        video.clone(),
        config.evidence_max_retries,
    ));
    let aggregator = ViolationAggregator::new(violations.clone(), events.clone(), devices.clone());
    let ingest = Arc::new(IngestionFacade::new(
        devices.clone(),
        session_repo,
        events.clone(),
        aggregator,
        evidence.clone(),
    ));
    tracing::info!("Components initialized");

    let state = AppState {
        pool,
        config: config.clone(),
        devices,
        events,
        violations,
        state_machine,
        sessions,
        evidence: evidence.clone(),
        ingest,
        video,
    };

    // Evidence readiness refresh loop
    let refresh_evidence = evidence.clone();
    let refresh_secs = config.evidence_refresh_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(refresh_secs));
        loop {
            interval.tick().await;
            if let Err(e) = refresh_evidence.refresh_pending().await {
                tracing::error!(error = %e, "Evidence refresh tick failed");
            }
        }
    });

    // Build router
    let app = web_api::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
