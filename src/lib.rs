//! Rate-limited Riot API ingestion and champion win-rate aggregation.
//!
//! Data flows `Collector -> Normalizer -> Aggregator`; the `Pipeline` ties
//! the last two together and reports everything it had to skip.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;

pub use config::Config;
pub use error::{Error, Result};
