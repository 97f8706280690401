// Clothing exchange marketplace: items, swaps and point balances

pub mod domain;
pub mod filter;
pub mod policy;
pub mod repository;
pub mod service;

pub use domain::{Actor, MarketError};
pub use filter::ListingFilter;
pub use policy::{FixedPointPolicy, PointPolicy};
pub use repository::{MarketRepository, SqliteMarketRepository};
pub use service::{Dashboard, ImageUpload, MarketSettings, Marketplace};
