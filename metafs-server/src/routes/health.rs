//! `GET /health` (spec §6).

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::infra::app_state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.is_ready() { "ok" } else { "starting" },
        service: "metafs-server",
        timestamp: chrono::Utc::now(),
    })
}
