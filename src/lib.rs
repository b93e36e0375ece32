// src/lib.rs

use std::sync::Arc;

use moka::future::Cache;
use sea_orm::DatabaseConnection;

use services::processor::ContractProcessor;
use services::queue::JobQueue;
use services::rate_limiter::RateLimiterRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub queue: Arc<JobQueue>,
    pub limiter: Arc<RateLimiterRegistry>,
    pub processor: Arc<ContractProcessor>,
    /// Ticker -> stablecoin id lookups on the metrics read path
    pub stablecoin_cache: Cache<String, i32>,
}

pub mod entities {
    pub mod prelude;

    pub mod block_addresses;
    pub mod blocks;
    pub mod companies;
    pub mod contracts;
    pub mod metrics;
    pub mod networks;
    pub mod rpc_endpoints;
    pub mod stablecoins;
    pub mod sync_state;
}

pub mod services {
    pub mod processor;
    pub mod queue;
    pub mod rate_limiter;
    pub mod resolution;
    pub mod rollup;
}

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod jobs;
pub mod models;
