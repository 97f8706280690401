use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::db;
use crate::market::{FixedPointPolicy, MarketSettings, Marketplace, SqliteMarketRepository};
use crate::storage::LocalObjectStore;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub market: Arc<Marketplace>,
}

impl AppState {
    /// Open the database, apply migrations and wire the marketplace to
    /// SQLite and the local uploads directory.
    pub fn build(config: Config) -> anyhow::Result<Self> {
        let pool = db::create_pool(&config.db_path())?;
        db::run_migrations(&pool)?;

        let store = LocalObjectStore::new(config.uploads_path(), &config.storage.public_base_url)?;
        let market = Marketplace::new(
            Arc::new(SqliteMarketRepository::new(pool.clone())),
            Arc::new(store),
            Arc::new(FixedPointPolicy::new(config.market.default_point_value)),
            MarketSettings::from(&config),
        );

        Ok(Self {
            db: pool,
            config,
            market: Arc::new(market),
        })
    }
}
