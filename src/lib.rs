// Library exports for Rewear
// This allows integration tests and external code to use Rewear modules

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod market;
pub mod routes;
pub mod state;
pub mod storage;
