pub use super::address_stats::Entity as AddressStats;
pub use super::coin_markets::Entity as CoinMarkets;
pub use super::coins::Entity as Coins;
pub use super::platforms::Entity as Platforms;
pub use super::sync_status::Entity as SyncStatus;
