//! Updater status HTTP endpoint.
//!
//! GET /api/v1/updater/status — returns the state of the background
//! updater as JSON: last cycle summary (per-stage record counts, fill
//! statistics), next wakeup time, and the last error if a cycle aborted.

use axum::extract::State;
use axum::Json;

use crate::services::updater::{SharedUpdaterState, UpdaterState};

/// Get the current updater status.
#[utoipa::path(
    get,
    path = "/api/v1/updater/status",
    tag = "Updater",
    responses(
        (status = 200, description = "Current updater status", body = UpdaterState),
    )
)]
pub async fn get_updater_status(State(state): State<SharedUpdaterState>) -> Json<UpdaterState> {
    let s = state.read().await;
    Json(s.clone())
}
