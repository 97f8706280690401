pub mod dashboard;
pub mod items;
pub mod profiles;
pub mod swaps;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full application router with shared layers applied
pub fn app(state: AppState) -> Router {
    let uploads = ServeDir::new(state.config.uploads_path());
    let body_limit = state.config.max_upload_bytes();

    Router::new()
        .route("/health", get(health))
        .merge(profiles::router())
        .merge(items::router())
        .merge(swaps::router())
        .merge(dashboard::router())
        .nest_service("/uploads", uploads)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
