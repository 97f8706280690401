use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppResult;
use crate::extractors::CurrentActor;
use crate::market::domain::Profile;
use crate::state::AppState;

#[derive(Deserialize)]
struct NewProfile {
    email: String,
    display_name: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/profiles", post(create_profile))
        .route("/api/profiles/me", get(me))
}

/// Sign-up; the only endpoint besides browsing that needs no actor
async fn create_profile(
    State(state): State<AppState>,
    Json(body): Json<NewProfile>,
) -> AppResult<(StatusCode, Json<Profile>)> {
    let profile = state
        .market
        .create_profile(&body.email, body.display_name.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn me(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> AppResult<Json<Profile>> {
    Ok(Json(state.market.profile(&actor.id).await?))
}
