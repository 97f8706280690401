use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::extractors::CurrentActor;
use crate::market::domain::{Item, ItemDraft, ItemId, ItemStatus};
use crate::market::repository::ListedItem;
use crate::market::{ImageUpload, ListingFilter};
use crate::state::AppState;

#[derive(Deserialize)]
struct BrowseQuery {
    category: Option<String>,
    condition: Option<String>,
    q: Option<String>,
}

#[derive(Deserialize)]
struct ModerationBody {
    decision: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/items", get(browse).post(create_item))
        .route("/api/items/featured", get(featured))
        .route("/api/items/{id}", get(item_detail))
        .route("/api/items/{id}/moderation", post(moderate))
}

async fn browse(
    State(state): State<AppState>,
    Query(query): Query<BrowseQuery>,
) -> AppResult<Json<Vec<ListedItem>>> {
    let filter = ListingFilter::parse(
        query.category.as_deref(),
        query.condition.as_deref(),
        query.q.as_deref(),
    )?;
    Ok(Json(state.market.browse(&filter).await?))
}

async fn featured(State(state): State<AppState>) -> AppResult<Json<Vec<ListedItem>>> {
    Ok(Json(state.market.featured().await?))
}

/// Multipart form: text fields plus one or more `image` files
async fn create_item(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<ListedItem>)> {
    let mut form = ItemForm::default();
    let mut images = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "image" {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("Read error: {}", e)))?;
            images.push(ImageUpload {
                file_name,
                content_type,
                data,
            });
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(format!("Read error: {}", e)))?;
        form.set(&name, value);
    }

    let listed = state
        .market
        .create_item(&actor, form.into_draft()?, images)
        .await?;
    Ok((StatusCode::CREATED, Json(listed)))
}

async fn item_detail(
    State(state): State<AppState>,
    actor: Option<CurrentActor>,
    Path(id): Path<String>,
) -> AppResult<Json<ListedItem>> {
    let viewer = actor.map(|CurrentActor(a)| a);
    let listed = state.market.item(viewer.as_ref(), &ItemId::new(id)).await?;
    Ok(Json(listed))
}

async fn moderate(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(body): Json<ModerationBody>,
) -> AppResult<Json<Item>> {
    let decision: ItemStatus = body.decision.parse()?;
    let item = state
        .market
        .moderate_item(&actor, &ItemId::new(id), decision)
        .await?;
    Ok(Json(item))
}

/// Text fields collected from the multipart body
#[derive(Default)]
struct ItemForm {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    condition: Option<String>,
    size: Option<String>,
}

impl ItemForm {
    fn set(&mut self, name: &str, value: String) {
        match name {
            "title" => self.title = Some(value),
            "description" => self.description = Some(value),
            "category" => self.category = Some(value),
            "condition" => self.condition = Some(value),
            "size" => self.size = Some(value),
            other => tracing::debug!("Ignoring unknown form field: {}", other),
        }
    }

    fn into_draft(self) -> AppResult<ItemDraft> {
        let category = self
            .category
            .ok_or_else(|| AppError::BadRequest("Category is required".into()))?
            .parse()?;
        let condition = self
            .condition
            .ok_or_else(|| AppError::BadRequest("Condition is required".into()))?
            .parse()?;

        Ok(ItemDraft {
            title: self.title.unwrap_or_default(),
            description: self.description,
            category,
            condition,
            size: self.size,
        })
    }
}
