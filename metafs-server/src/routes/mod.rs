pub mod fuse;
pub mod health;
pub mod rules;

use axum::routing::{get, post};
use axum::Router;

use crate::infra::app_state::AppState;

/// Builds the full HTTP surface (spec §6 REST API table).
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/fuse/stats", get(fuse::stats))
        .route("/api/fuse/readdir", post(fuse::readdir))
        .route("/api/fuse/getattr", post(fuse::getattr))
        .route("/api/fuse/exists", post(fuse::exists))
        .route("/api/fuse/read", post(fuse::read))
        .route("/api/fuse/metadata", post(fuse::metadata))
        .route("/api/fuse/files", get(fuse::files))
        .route("/api/fuse/directories", get(fuse::directories))
        .route("/api/fuse/refresh", post(fuse::refresh))
        .route(
            "/api/fuse/rules",
            get(rules::get_rules).put(rules::put_rules),
        )
        .route("/api/fuse/rules/preview", post(rules::preview))
        .route("/api/fuse/rules/validate", post(rules::validate))
        .route("/api/fuse/rules/variables", get(rules::variables))
}
