use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppResult;
use crate::extractors::CurrentActor;
use crate::market::domain::{ExchangeKind, ItemId, Swap, SwapId, SwapRequest, SwapStatus};
use crate::state::AppState;

#[derive(Deserialize)]
struct NewSwap {
    item_id: ItemId,
    exchange_type: String,
    offered_item_id: Option<ItemId>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct TransitionBody {
    status: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/swaps", post(create_swap))
        .route("/api/swaps/{id}/transition", post(transition))
}

async fn create_swap(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(body): Json<NewSwap>,
) -> AppResult<(StatusCode, Json<Swap>)> {
    let kind: ExchangeKind = body.exchange_type.parse()?;
    let request = SwapRequest::new(
        body.item_id,
        kind,
        body.offered_item_id,
        body.message.as_deref(),
    )?;

    let swap = state.market.create_swap(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(swap)))
}

async fn transition(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> AppResult<Json<Swap>> {
    let next: SwapStatus = body.status.parse()?;
    let swap = state
        .market
        .transition_swap(&actor, &SwapId::new(id), next)
        .await?;
    Ok(Json(swap))
}
