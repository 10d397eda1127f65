// Surfcast updater v0.1
use axum::{routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod bucket;
mod config;
mod db;
mod dedup;
mod errors;
mod fill;
mod geo;
mod helpers;
mod record;
mod routes;
mod services;

use config::AppConfig;
use services::updater::{SharedUpdaterState, UpdaterState};

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 2;

/// Surfcast updater — OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Surfcast Updater",
        version = "0.1.0",
        description = "Surf forecast ingestion pipeline. Pulls wave, wind, weather and tide \
            forecasts from Open-Meteo and NOAA CO-OPS for every registered spot, merges the \
            sources by a fixed precedence order, fills remaining gaps from the nearest \
            neighboring spots, and upserts consolidated rows to Postgres.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Updater", description = "Background updater status"),
    ),
    paths(
        routes::health::health_check,
        routes::status::get_updater_status,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            services::updater::UpdaterState,
            services::updater::CycleSummary,
            services::updater::StageCount,
            services::updater::FieldCounter,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "surfcast_updater=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    // Set up database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(DB_POOL_MAX_CONNECTIONS)
        .min_connections(DB_POOL_MIN_CONNECTIONS)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations completed");

    // Build the source stages in merge-policy order and spawn the updater
    let stages = services::default_stages(&config);
    let updater_state: SharedUpdaterState = Arc::new(RwLock::new(UpdaterState::new()));
    tokio::spawn(services::updater::run_updater(
        pool.clone(),
        stages,
        updater_state.clone(),
        config.clone(),
    ));

    // CORS — read-only API, restrict methods to GET
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET])
        .allow_headers(Any);

    // Health check uses PgPool to verify DB connectivity; status uses the
    // shared updater state.
    let health_routes = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .with_state(pool);

    let status_routes = Router::new()
        .route(
            "/api/v1/updater/status",
            get(routes::status::get_updater_status),
        )
        .with_state(updater_state);

    let app = Router::new()
        .merge(health_routes)
        .merge(status_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Status server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
