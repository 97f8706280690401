// Repository pattern - isolates all database side effects
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

use crate::market::domain::*;
use crate::state::DbPool;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for MarketError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => MarketError::NotFound(what),
            RepositoryError::Conflict(msg) => MarketError::Validation(msg),
            other => MarketError::DependencyFailure(other.to_string()),
        }
    }
}

/// Equality filters over the items table, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQuery {
    pub owner_id: Option<ProfileId>,
    pub status: Option<ItemStatus>,
    pub available: Option<bool>,
    pub category: Option<Category>,
    pub condition: Option<Condition>,
    pub limit: Option<usize>,
}

impl ItemQuery {
    /// Approved and available
    pub fn visible() -> Self {
        Self {
            status: Some(ItemStatus::Approved),
            available: Some(true),
            ..Self::default()
        }
    }

    pub fn owned_by(owner: &ProfileId) -> Self {
        Self {
            owner_id: Some(owner.clone()),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(owner) = &self.owner_id {
            clauses.push("owner_id = ?");
            values.push(Value::Text(owner.as_str().to_string()));
        }
        if let Some(status) = self.status {
            clauses.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(available) = self.available {
            clauses.push("is_available = ?");
            values.push(Value::Integer(available as i64));
        }
        if let Some(category) = self.category {
            clauses.push("category = ?");
            values.push(Value::Text(category.as_str().to_string()));
        }
        if let Some(condition) = self.condition {
            clauses.push("condition = ?");
            values.push(Value::Text(condition.as_str().to_string()));
        }

        let mut sql = format!("SELECT {} FROM items", ITEM_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(limit as i64));
        }

        (sql, values)
    }
}

/// An item together with its images, primary first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedItem {
    #[serde(flatten)]
    pub item: Item,
    pub images: Vec<ItemImage>,
}

impl ListedItem {
    pub fn primary_image(&self) -> Option<&ItemImage> {
        self.images.iter().find(|img| img.is_primary)
    }
}

/// A swap joined with the titles and names a dashboard shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapSummary {
    #[serde(flatten)]
    pub swap: Swap,
    pub item_title: String,
    pub offered_item_title: Option<String>,
    pub owner_display_name: Option<String>,
}

/// Result of trying to settle an accepted swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed(Swap),
    /// Stored status no longer matches what the caller saw
    StatusChanged,
    ItemUnavailable,
    InsufficientPoints { needed: i64, available: i64 },
    /// The balances cannot absorb the transfer, e.g. the payee would overflow
    TransferRefused(MarketError),
}

/// Repository trait - all database operations
#[async_trait]
pub trait MarketRepository: Send + Sync {
    async fn create_profile(&self, profile: &Profile) -> Result<(), RepositoryError>;

    async fn profile(&self, id: &ProfileId) -> Result<Option<Profile>, RepositoryError>;

    /// Item row and all image rows in one transaction
    async fn insert_item_with_images(
        &self,
        item: &Item,
        images: &[ItemImage],
    ) -> Result<(), RepositoryError>;

    async fn item(&self, id: &ItemId) -> Result<Option<Item>, RepositoryError>;

    async fn item_images(&self, id: &ItemId) -> Result<Vec<ItemImage>, RepositoryError>;

    async fn list_items(&self, query: &ItemQuery) -> Result<Vec<ListedItem>, RepositoryError>;

    async fn insert_swap(&self, swap: &Swap) -> Result<(), RepositoryError>;

    async fn swap(&self, id: &SwapId) -> Result<Option<Swap>, RepositoryError>;

    /// Swaps where the profile is the requester OR the owner
    async fn swaps_for_profile(&self, id: &ProfileId)
        -> Result<Vec<SwapSummary>, RepositoryError>;

    /// Compare-and-set; `None` if the stored status is no longer `expected`
    async fn update_swap_status(
        &self,
        id: &SwapId,
        expected: SwapStatus,
        next: SwapStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Swap>, RepositoryError>;

    /// Atomically mark the swap completed, move points, and retire the items
    async fn complete_swap(
        &self,
        swap: &Swap,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome, RepositoryError>;

    /// Compare-and-set from pending; optionally credit the owner the item's points
    async fn moderate_item(
        &self,
        id: &ItemId,
        decision: ItemStatus,
        award_points: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Item>, RepositoryError>;
}

const PROFILE_COLUMNS: &str = "id, email, display_name, avatar_url, points, created_at";

const ITEM_COLUMNS: &str = "id, owner_id, title, description, category, condition, size, \
     point_value, status, is_available, created_at, updated_at";

const IMAGE_COLUMNS: &str = "id, item_id, image_url, is_primary, position, created_at";

const SWAP_COLUMNS: &str = "id, item_id, offered_item_id, requester_id, owner_id, exchange_type, \
     points_used, status, message, created_at, updated_at";

/// SQLite implementation
pub struct SqliteMarketRepository {
    pool: DbPool,
}

impl SqliteMarketRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MarketRepository for SqliteMarketRepository {
    async fn create_profile(&self, profile: &Profile) -> Result<(), RepositoryError> {
        let conn = self.pool.get()?;

        let result = conn.execute(
            "INSERT INTO profiles (id, email, display_name, avatar_url, points, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                profile.id.as_str(),
                profile.email,
                profile.display_name,
                profile.avatar_url,
                profile.points,
                timestamp(&profile.created_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(RepositoryError::Conflict(format!(
                "A profile for {} already exists",
                profile.email
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn profile(&self, id: &ProfileId) -> Result<Option<Profile>, RepositoryError> {
        let conn = self.pool.get()?;
        load_profile(&conn, id)
    }

    async fn insert_item_with_images(
        &self,
        item: &Item,
        images: &[ItemImage],
    ) -> Result<(), RepositoryError> {
        let conn = self.pool.get()?;

        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<(), RepositoryError> = (|| {
            conn.execute(
                "INSERT INTO items (id, owner_id, title, description, category, condition, size,
                                    point_value, status, is_available, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    item.id.as_str(),
                    item.owner_id.as_str(),
                    item.title,
                    item.description,
                    item.category.as_str(),
                    item.condition.as_str(),
                    item.size,
                    item.point_value,
                    item.status.as_str(),
                    item.is_available,
                    timestamp(&item.created_at),
                    timestamp(&item.updated_at),
                ],
            )?;

            for image in images {
                conn.execute(
                    "INSERT INTO item_images (id, item_id, image_url, is_primary, position, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        image.id,
                        image.item_id.as_str(),
                        image.image_url,
                        image.is_primary,
                        image.position,
                        timestamp(&image.created_at),
                    ],
                )?;
            }

            Ok(())
        })();

        finish(&conn, result)
    }

    async fn item(&self, id: &ItemId) -> Result<Option<Item>, RepositoryError> {
        let conn = self.pool.get()?;
        load_item(&conn, id)
    }

    async fn item_images(&self, id: &ItemId) -> Result<Vec<ItemImage>, RepositoryError> {
        let conn = self.pool.get()?;
        load_images(&conn, id)
    }

    async fn list_items(&self, query: &ItemQuery) -> Result<Vec<ListedItem>, RepositoryError> {
        let conn = self.pool.get()?;
        let (sql, values) = query.to_sql();

        let items = {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), item_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        items
            .into_iter()
            .map(|item| {
                let images = load_images(&conn, &item.id)?;
                Ok(ListedItem { item, images })
            })
            .collect()
    }

    async fn insert_swap(&self, swap: &Swap) -> Result<(), RepositoryError> {
        let conn = self.pool.get()?;

        conn.execute(
            "INSERT INTO swaps (id, item_id, offered_item_id, requester_id, owner_id, exchange_type,
                                points_used, status, message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                swap.id.as_str(),
                swap.item_id.as_str(),
                swap.exchange.offered_item_id().map(ItemId::as_str),
                swap.requester_id.as_str(),
                swap.owner_id.as_str(),
                swap.exchange.kind().as_str(),
                swap.exchange.points_used(),
                swap.status.as_str(),
                swap.message,
                timestamp(&swap.created_at),
                timestamp(&swap.updated_at),
            ],
        )?;

        Ok(())
    }

    async fn swap(&self, id: &SwapId) -> Result<Option<Swap>, RepositoryError> {
        let conn = self.pool.get()?;
        load_swap(&conn, id)
    }

    async fn swaps_for_profile(
        &self,
        id: &ProfileId,
    ) -> Result<Vec<SwapSummary>, RepositoryError> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT s.id, s.item_id, s.offered_item_id, s.requester_id, s.owner_id,
                    s.exchange_type, s.points_used, s.status, s.message, s.created_at,
                    s.updated_at, i.title, o.title, p.display_name
             FROM swaps s
             JOIN items i ON i.id = s.item_id
             LEFT JOIN items o ON o.id = s.offered_item_id
             LEFT JOIN profiles p ON p.id = s.owner_id
             WHERE s.requester_id = ?1 OR s.owner_id = ?1
             ORDER BY s.created_at DESC, s.id DESC",
        )?;

        let summaries = stmt
            .query_map(params![id.as_str()], |row| {
                Ok(SwapSummary {
                    swap: swap_from_row(row)?,
                    item_title: row.get(11)?,
                    offered_item_title: row.get(12)?,
                    owner_display_name: row.get(13)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(summaries)
    }

    async fn update_swap_status(
        &self,
        id: &SwapId,
        expected: SwapStatus,
        next: SwapStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Swap>, RepositoryError> {
        let conn = self.pool.get()?;

        let changed = conn.execute(
            "UPDATE swaps SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![next.as_str(), timestamp(&now), id.as_str(), expected.as_str()],
        )?;

        if changed == 0 {
            return Ok(None);
        }
        load_swap(&conn, id)
    }

    async fn complete_swap(
        &self,
        swap: &Swap,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome, RepositoryError> {
        let conn = self.pool.get()?;

        // ATOMIC TRANSACTION - status, balances and availability move together
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<CompletionOutcome, RepositoryError> = (|| {
            let stamp = timestamp(&now);

            let current = load_swap(&conn, &swap.id)?
                .ok_or_else(|| RepositoryError::NotFound(format!("Swap {}", swap.id)))?;
            if current.status != swap.status {
                return Ok(CompletionOutcome::StatusChanged);
            }

            let mut retired = vec![&swap.item_id];
            if let Some(offered) = swap.exchange.offered_item_id() {
                retired.push(offered);
            }
            for item_id in &retired {
                let available = load_item(&conn, item_id)?
                    .map(|item| item.is_available)
                    .unwrap_or(false);
                if !available {
                    return Ok(CompletionOutcome::ItemUnavailable);
                }
            }

            if let Some(points) = swap.exchange.points_used() {
                let payer = load_points(&conn, &swap.requester_id)?;
                let payee = load_points(&conn, &swap.owner_id)?;
                if payer < points {
                    return Ok(CompletionOutcome::InsufficientPoints {
                        needed: points,
                        available: payer,
                    });
                }
                let (payer_after, payee_after) =
                    match PointTransfer::new(points).apply(payer, payee) {
                        Ok(balances) => balances,
                        Err(e) => return Ok(CompletionOutcome::TransferRefused(e)),
                    };

                conn.execute(
                    "UPDATE profiles SET points = ?1 WHERE id = ?2",
                    params![payer_after, swap.requester_id.as_str()],
                )?;
                conn.execute(
                    "UPDATE profiles SET points = ?1 WHERE id = ?2",
                    params![payee_after, swap.owner_id.as_str()],
                )?;
            }

            for item_id in &retired {
                conn.execute(
                    "UPDATE items SET is_available = 0, updated_at = ?1 WHERE id = ?2",
                    params![stamp, item_id.as_str()],
                )?;
                // Other open swaps on a retired item can never complete
                conn.execute(
                    "UPDATE swaps SET status = ?1, updated_at = ?2
                     WHERE id <> ?3 AND status IN (?4, ?5)
                       AND (item_id = ?6 OR offered_item_id = ?6)",
                    params![
                        SwapStatus::Cancelled.as_str(),
                        stamp,
                        swap.id.as_str(),
                        SwapStatus::Pending.as_str(),
                        SwapStatus::Accepted.as_str(),
                        item_id.as_str()
                    ],
                )?;
            }

            conn.execute(
                "UPDATE swaps SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![
                    SwapStatus::Completed.as_str(),
                    stamp,
                    swap.id.as_str(),
                    swap.status.as_str()
                ],
            )?;

            let completed = load_swap(&conn, &swap.id)?
                .ok_or_else(|| RepositoryError::NotFound(format!("Swap {}", swap.id)))?;
            Ok(CompletionOutcome::Completed(completed))
        })();

        match result {
            Ok(outcome @ CompletionOutcome::Completed(_)) => {
                conn.execute("COMMIT", [])?;
                Ok(outcome)
            }
            Ok(outcome) => {
                conn.execute("ROLLBACK", [])?;
                Ok(outcome)
            }
            Err(e) => {
                conn.execute("ROLLBACK", [])?;
                Err(e)
            }
        }
    }

    async fn moderate_item(
        &self,
        id: &ItemId,
        decision: ItemStatus,
        award_points: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Item>, RepositoryError> {
        let conn = self.pool.get()?;

        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<Option<Item>, RepositoryError> = (|| {
            let changed = conn.execute(
                "UPDATE items SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![
                    decision.as_str(),
                    timestamp(&now),
                    id.as_str(),
                    ItemStatus::Pending.as_str()
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }

            if award_points && decision == ItemStatus::Approved {
                conn.execute(
                    "UPDATE profiles
                     SET points = points + (SELECT point_value FROM items WHERE id = ?1)
                     WHERE id = (SELECT owner_id FROM items WHERE id = ?1)",
                    params![id.as_str()],
                )?;
            }

            load_item(&conn, id)
        })();

        match result {
            Ok(Some(item)) => {
                conn.execute("COMMIT", [])?;
                Ok(Some(item))
            }
            Ok(None) => {
                conn.execute("ROLLBACK", [])?;
                Ok(None)
            }
            Err(e) => {
                conn.execute("ROLLBACK", [])?;
                Err(e)
            }
        }
    }
}

fn finish<T>(conn: &Connection, result: Result<T, RepositoryError>) -> Result<T, RepositoryError> {
    match result {
        Ok(value) => {
            conn.execute("COMMIT", [])?;
            Ok(value)
        }
        Err(e) => {
            conn.execute("ROLLBACK", [])?;
            Err(e)
        }
    }
}

fn load_profile(conn: &Connection, id: &ProfileId) -> Result<Option<Profile>, RepositoryError> {
    let profile = conn
        .query_row(
            &format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLUMNS),
            params![id.as_str()],
            profile_from_row,
        )
        .optional()?;
    Ok(profile)
}

fn load_points(conn: &Connection, id: &ProfileId) -> Result<i64, RepositoryError> {
    conn.query_row(
        "SELECT points FROM profiles WHERE id = ?1",
        params![id.as_str()],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| RepositoryError::NotFound(format!("Profile {}", id)))
}

fn load_item(conn: &Connection, id: &ItemId) -> Result<Option<Item>, RepositoryError> {
    let item = conn
        .query_row(
            &format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS),
            params![id.as_str()],
            item_from_row,
        )
        .optional()?;
    Ok(item)
}

fn load_images(conn: &Connection, id: &ItemId) -> Result<Vec<ItemImage>, RepositoryError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM item_images WHERE item_id = ?1 ORDER BY is_primary DESC, position ASC",
        IMAGE_COLUMNS
    ))?;
    let images = stmt
        .query_map(params![id.as_str()], image_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(images)
}

fn load_swap(conn: &Connection, id: &SwapId) -> Result<Option<Swap>, RepositoryError> {
    let swap = conn
        .query_row(
            &format!("SELECT {} FROM swaps WHERE id = ?1", SWAP_COLUMNS),
            params![id.as_str()],
            swap_from_row,
        )
        .optional()?;
    Ok(swap)
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: ProfileId(row.get(0)?),
        email: row.get(1)?,
        display_name: row.get(2)?,
        avatar_url: row.get(3)?,
        points: row.get(4)?,
        created_at: time_column(row, 5)?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: ItemId(row.get(0)?),
        owner_id: ProfileId(row.get(1)?),
        title: row.get(2)?,
        description: row.get(3)?,
        category: text_column(row, 4)?,
        condition: text_column(row, 5)?,
        size: row.get(6)?,
        point_value: row.get(7)?,
        status: text_column(row, 8)?,
        is_available: row.get(9)?,
        created_at: time_column(row, 10)?,
        updated_at: time_column(row, 11)?,
    })
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<ItemImage> {
    Ok(ItemImage {
        id: row.get(0)?,
        item_id: ItemId(row.get(1)?),
        image_url: row.get(2)?,
        is_primary: row.get(3)?,
        position: row.get(4)?,
        created_at: time_column(row, 5)?,
    })
}

fn swap_from_row(row: &Row<'_>) -> rusqlite::Result<Swap> {
    let kind: ExchangeKind = text_column(row, 5)?;
    let offered: Option<String> = row.get(2)?;
    let points_used: Option<i64> = row.get(6)?;
    let exchange = Exchange::from_parts(kind, offered.map(ItemId), points_used)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(Swap {
        id: SwapId(row.get(0)?),
        item_id: ItemId(row.get(1)?),
        requester_id: ProfileId(row.get(3)?),
        owner_id: ProfileId(row.get(4)?),
        exchange,
        status: text_column(row, 7)?,
        message: row.get(8)?,
        created_at: time_column(row, 9)?,
        updated_at: time_column(row, 10)?,
    })
}

fn text_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = MarketError>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: MarketError| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Fixed-width UTC timestamps so text order is time order
fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}
