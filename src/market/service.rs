//! Marketplace operations.
//!
//! `Marketplace` sequences the pure domain rules against the repository and
//! the object store. Every operation takes the acting profile explicitly;
//! nothing here reads ambient request state.

use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::market::domain::*;
use crate::market::filter::ListingFilter;
use crate::market::policy::PointPolicy;
use crate::market::repository::{
    CompletionOutcome, ItemQuery, ListedItem, MarketRepository, SwapSummary,
};
use crate::storage::{image_extension, ObjectPath, ObjectStore};

/// Tunables drawn from the `[market]` and `[moderation]` config sections
#[derive(Debug, Clone)]
pub struct MarketSettings {
    pub max_images_per_item: usize,
    pub featured_limit: usize,
    pub starting_points: i64,
    pub award_points_on_approval: bool,
    pub moderators: Vec<ProfileId>,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            max_images_per_item: 5,
            featured_limit: 6,
            starting_points: 0,
            award_points_on_approval: true,
            moderators: Vec::new(),
        }
    }
}

impl From<&Config> for MarketSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_images_per_item: config.market.max_images_per_item,
            featured_limit: config.market.featured_limit,
            starting_points: config.market.starting_points,
            award_points_on_approval: config.market.award_points_on_approval,
            moderators: config
                .moderation
                .moderators
                .iter()
                .map(|id| ProfileId::new(id.as_str()))
                .collect(),
        }
    }
}

/// One uploaded file, as received from the client
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Everything the signed-in profile sees on their dashboard
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub profile: Profile,
    pub items: Vec<ListedItem>,
    pub swaps: Vec<SwapSummary>,
    pub listed_items: usize,
    pub active_swaps: usize,
}

#[derive(Clone)]
pub struct Marketplace {
    repo: Arc<dyn MarketRepository>,
    store: Arc<dyn ObjectStore>,
    policy: Arc<dyn PointPolicy>,
    settings: MarketSettings,
}

impl Marketplace {
    pub fn new(
        repo: Arc<dyn MarketRepository>,
        store: Arc<dyn ObjectStore>,
        policy: Arc<dyn PointPolicy>,
        settings: MarketSettings,
    ) -> Self {
        Self {
            repo,
            store,
            policy,
            settings,
        }
    }

    pub fn settings(&self) -> &MarketSettings {
        &self.settings
    }

    pub async fn create_profile(
        &self,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<Profile, MarketError> {
        let profile = Profile::register(email, display_name, self.settings.starting_points, now())?;
        self.repo.create_profile(&profile).await?;

        tracing::info!(profile_id = %profile.id, "Profile created");
        Ok(profile)
    }

    pub async fn profile(&self, id: &ProfileId) -> Result<Profile, MarketError> {
        self.repo
            .profile(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("Profile {}", id)))
    }

    /// Two-phase listing: store every image, then write the item and its
    /// image rows in one transaction. Stored blobs are removed on any failure.
    pub async fn create_item(
        &self,
        actor: &Actor,
        draft: ItemDraft,
        images: Vec<ImageUpload>,
    ) -> Result<ListedItem, MarketError> {
        let owner = self.profile(&actor.id).await?;
        let draft = draft.validate()?;

        if images.is_empty() {
            return Err(MarketError::validation("At least one image is required"));
        }
        if images.len() > self.settings.max_images_per_item {
            return Err(MarketError::validation(format!(
                "At most {} images per item",
                self.settings.max_images_per_item
            )));
        }

        let created_at = now();
        let point_value = self.policy.point_value(&draft);
        let item = draft.into_item(owner.id.clone(), point_value, created_at);

        let mut uploads = Vec::with_capacity(images.len());
        for (index, image) in images.into_iter().enumerate() {
            if image.data.is_empty() {
                return Err(MarketError::validation("Image files cannot be empty"));
            }
            let ext = image_extension(
                image.file_name.as_deref().unwrap_or_default(),
                image.content_type.as_deref(),
            )
            .ok_or_else(|| MarketError::validation("Only image uploads are accepted"))?;
            let path = ObjectPath::item_image(&owner.id, &item.id, created_at, index, &ext)?;
            uploads.push((path, image.data));
        }

        let results = join_all(
            uploads
                .iter()
                .map(|(path, data)| self.store.put(path, data.clone())),
        )
        .await;

        let stored: Vec<&ObjectPath> = uploads
            .iter()
            .zip(&results)
            .filter(|(_, result)| result.is_ok())
            .map(|((path, _), _)| path)
            .collect();

        let mut urls = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(url) => urls.push(url),
                Err(e) => {
                    tracing::warn!(item_id = %item.id, "Image upload failed: {}", e);
                    self.discard(&stored).await;
                    return Err(e.into());
                }
            }
        }

        let rows: Vec<ItemImage> = urls
            .into_iter()
            .enumerate()
            .map(|(position, image_url)| ItemImage {
                id: uuid::Uuid::now_v7().to_string(),
                item_id: item.id.clone(),
                image_url,
                is_primary: position == 0,
                position: position as u32,
                created_at,
            })
            .collect();

        if let Err(e) = self.repo.insert_item_with_images(&item, &rows).await {
            tracing::warn!(item_id = %item.id, "Item insert failed: {}", e);
            self.discard(&stored).await;
            return Err(e.into());
        }

        tracing::info!(
            item_id = %item.id,
            owner_id = %owner.id,
            images = rows.len(),
            "Item listed for moderation"
        );
        Ok(ListedItem { item, images: rows })
    }

    async fn discard(&self, paths: &[&ObjectPath]) {
        for result in join_all(paths.iter().map(|path| self.store.delete(path))).await {
            if let Err(e) = result {
                tracing::warn!("Failed to remove orphaned upload: {}", e);
            }
        }
    }

    /// Hidden items are reported as missing to everyone but their owner
    pub async fn item(&self, viewer: Option<&Actor>, id: &ItemId) -> Result<ListedItem, MarketError> {
        let not_found = || MarketError::NotFound(format!("Item {}", id));

        let item = self.repo.item(id).await?.ok_or_else(not_found)?;
        if !item.is_visible_to(viewer.map(|a| &a.id)) {
            return Err(not_found());
        }

        let images = self.repo.item_images(id).await?;
        Ok(ListedItem { item, images })
    }

    pub async fn browse(&self, filter: &ListingFilter) -> Result<Vec<ListedItem>, MarketError> {
        let candidates = self
            .repo
            .list_items(&filter.narrow(ItemQuery::default()))
            .await?;
        Ok(filter.apply(candidates))
    }

    /// Most recent visible items
    pub async fn featured(&self) -> Result<Vec<ListedItem>, MarketError> {
        let query = ItemQuery::visible().limit(self.settings.featured_limit);
        Ok(self.repo.list_items(&query).await?)
    }

    pub async fn moderate_item(
        &self,
        actor: &Actor,
        id: &ItemId,
        decision: ItemStatus,
    ) -> Result<Item, MarketError> {
        if !self.settings.moderators.contains(&actor.id) {
            return Err(MarketError::UnauthorizedActor(
                "Only moderators can review items".to_string(),
            ));
        }

        let item = self
            .repo
            .item(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("Item {}", id)))?;
        let decision = item.status.moderate(decision)?;

        let award = self.settings.award_points_on_approval;
        let moderated = self
            .repo
            .moderate_item(id, decision, award, now())
            .await?
            .ok_or_else(|| MarketError::IllegalTransition {
                entity: "item",
                from: item.status.to_string(),
                to: decision.to_string(),
            })?;

        tracing::info!(item_id = %id, moderator = %actor.id, status = %decision, "Item moderated");
        Ok(moderated)
    }

    pub async fn create_swap(
        &self,
        actor: &Actor,
        request: SwapRequest,
    ) -> Result<Swap, MarketError> {
        let requester = self.profile(&actor.id).await?;
        let item = self
            .repo
            .item(&request.item_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("Item {}", request.item_id)))?;

        let offered = match &request.offer {
            Offer::Item(offered_id) => Some(
                self.repo
                    .item(offered_id)
                    .await?
                    .ok_or_else(|| MarketError::NotFound(format!("Item {}", offered_id)))?,
            ),
            Offer::Points => None,
        };

        let swap = open_swap(&requester, &item, request, offered.as_ref(), now())?;
        self.repo.insert_swap(&swap).await?;

        tracing::info!(
            swap_id = %swap.id,
            item_id = %swap.item_id,
            exchange = %swap.exchange.kind(),
            "Swap requested"
        );
        Ok(swap)
    }

    /// Owner-driven status change. Completion settles points and retires the
    /// items in the same transaction as the status write.
    pub async fn transition_swap(
        &self,
        actor: &Actor,
        id: &SwapId,
        next: SwapStatus,
    ) -> Result<Swap, MarketError> {
        let swap = self
            .repo
            .swap(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("Swap {}", id)))?;
        let next = swap.status.transition(next, swap.role_of(actor))?;

        let stale = || MarketError::IllegalTransition {
            entity: "swap",
            from: swap.status.to_string(),
            to: next.to_string(),
        };

        let updated = if next == SwapStatus::Completed {
            match self.repo.complete_swap(&swap, now()).await? {
                CompletionOutcome::Completed(done) => done,
                CompletionOutcome::StatusChanged => return Err(stale()),
                CompletionOutcome::ItemUnavailable => {
                    return Err(MarketError::invalid_exchange(
                        "An item in this swap is no longer available",
                    ))
                }
                CompletionOutcome::InsufficientPoints { needed, available } => {
                    return Err(MarketError::invalid_exchange(format!(
                        "Not enough points: {} needed, {} available",
                        needed, available
                    )))
                }
                CompletionOutcome::TransferRefused(e) => return Err(e),
            }
        } else {
            self.repo
                .update_swap_status(id, swap.status, next, now())
                .await?
                .ok_or_else(stale)?
        };

        tracing::info!(swap_id = %id, from = %swap.status, to = %next, "Swap transitioned");
        Ok(updated)
    }

    pub async fn dashboard(&self, actor: &Actor) -> Result<Dashboard, MarketError> {
        let profile = self.profile(&actor.id).await?;
        let items = self.repo.list_items(&ItemQuery::owned_by(&profile.id)).await?;
        let swaps = self.repo.swaps_for_profile(&profile.id).await?;

        let listed_items = items.len();
        let active_swaps = swaps.iter().filter(|s| s.swap.status.is_active()).count();

        Ok(Dashboard {
            profile,
            items,
            swaps,
            listed_items,
            active_swaps,
        })
    }
}
