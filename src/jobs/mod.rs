pub mod scheduler;
pub mod address_sync;
pub mod circulating_supply_sync;
pub mod coin_market_sync;
