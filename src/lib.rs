// src/lib.rs

pub mod entities {
    pub mod prelude;
    pub mod address_stats;
    pub mod coin_markets;
    pub mod coins;
    pub mod platforms;
    pub mod sync_status;
}

pub mod services {
    pub mod repository;
    pub mod entity_resolver;
    pub mod chunked_fetcher;
    pub mod aggregator;
    pub mod backfill;
    pub mod supply_resolver;
}

pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod providers;
pub mod wiring;
