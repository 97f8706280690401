use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::error::AppResult;
use crate::extractors::CurrentActor;
use crate::market::Dashboard;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/dashboard", get(dashboard))
}

/// The actor's profile, own items and swaps, with summary counts
async fn dashboard(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> AppResult<Json<Dashboard>> {
    Ok(Json(state.market.dashboard(&actor).await?))
}
