use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status ("ok" when healthy, "degraded" when DB is unreachable)
    pub status: String,
    /// Service version
    pub version: String,
    /// Whether the database is reachable
    pub database: bool,
    /// Number of registered spots, when the database answered
    pub spots: Option<i64>,
}

/// Health check endpoint.
///
/// Probes the database by counting the spot registry. Returns status
/// "degraded" (still 200) if the DB is unreachable, so load balancers can
/// distinguish partial failures. A reachable database with zero spots is
/// also degraded: the updater has nothing to work on.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_check(State(pool): State<PgPool>) -> Json<HealthResponse> {
    let spots = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM spots")
        .fetch_one(&pool)
        .await
        .ok();

    let status = match spots {
        Some(n) if n > 0 => "ok",
        Some(_) => "degraded",
        None => "degraded",
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: spots.is_some(),
        spots,
    })
}
