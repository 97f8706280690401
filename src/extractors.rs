use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;

use crate::error::AppError;
use crate::market::domain::{Actor, ProfileId};
use crate::market::MarketError;
use crate::state::AppState;

/// Header carrying the acting profile id
pub const ACTOR_HEADER: &str = "x-actor-id";

/// The profile making the request.
/// Returns 401 if the header is missing or names no known profile.
#[derive(Debug, Clone)]
pub struct CurrentActor(pub Actor);

impl FromRequestParts<AppState> for CurrentActor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let id = actor_id(parts).ok_or(AppError::Unauthorized)?;

        match state.market.profile(&id).await {
            Ok(profile) => Ok(CurrentActor(Actor::new(profile.id))),
            Err(MarketError::NotFound(_)) => Err(AppError::Unauthorized),
            Err(e) => Err(e.into()),
        }
    }
}

/// Anonymous requests yield `None`; an unknown id is still rejected
impl OptionalFromRequestParts<AppState> for CurrentActor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Option<Self>, Self::Rejection> {
        if actor_id(parts).is_none() {
            return Ok(None);
        }
        <CurrentActor as FromRequestParts<AppState>>::from_request_parts(parts, state)
            .await
            .map(Some)
    }
}

fn actor_id(parts: &Parts) -> Option<ProfileId> {
    parts
        .headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ProfileId::new)
}
